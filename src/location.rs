use serde::{Deserialize, Serialize};

/// A saved city, under a label the user picked.
///
/// `(city, display_name)` identifies an entry, so the same city may be saved
/// more than once under different labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub city: String,
    pub display_name: String,
    pub last_temperature_c: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Saved {
    Added,
    Updated,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenameError {
    #[error("Location not found")]
    NotFound,
    #[error("A name is required")]
    EmptyName,
    #[error("You already have a location called \"{0}\" for this city")]
    NameTaken(String),
}

/// One owner's ordered list of favourite locations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Favorites(Vec<Location>);

pub fn normalize_city(city: &str) -> String {
    city.trim().to_lowercase()
}

impl Favorites {
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Location> {
        self.0.iter()
    }

    #[cfg(test)]
    pub fn as_slice(&self) -> &[Location] {
        &self.0
    }

    /// `city` must already be normalised; `display_name` is trimmed here.
    fn position(&self, city: &str, display_name: &str) -> Option<usize> {
        let display_name = display_name.trim();
        self.0
            .iter()
            .position(|loc| loc.city == city && loc.display_name == display_name)
    }

    #[cfg(test)]
    pub fn find(&self, city: &str, display_name: &str) -> Option<&Location> {
        let city = normalize_city(city);
        self.position(&city, display_name).map(|i| &self.0[i])
    }

    /// Refreshes the temperature of an existing `(city, display_name)` entry
    /// in place, or appends a new one.
    pub fn add_or_update(&mut self, city: &str, display_name: &str, temp_c: f64) -> Saved {
        let city = normalize_city(city);
        let display_name = display_name.trim();

        match self.position(&city, display_name) {
            Some(i) => {
                self.0[i].last_temperature_c = temp_c;
                Saved::Updated
            }
            None => {
                self.0.push(Location {
                    city,
                    display_name: display_name.into(),
                    last_temperature_c: temp_c,
                });
                Saved::Added
            }
        }
    }

    /// Removes the first exact match. Missing entries are not an error.
    pub fn delete(&mut self, city: &str, display_name: &str) -> Option<Location> {
        let city = normalize_city(city);
        self.position(&city, display_name)
            .map(|i| self.0.remove(i))
    }

    pub fn rename(
        &mut self,
        city: &str,
        old_display_name: &str,
        new_display_name: &str,
    ) -> Result<(), RenameError> {
        let city = normalize_city(city);
        let new_display_name = new_display_name.trim();

        if new_display_name.is_empty() {
            return Err(RenameError::EmptyName);
        }

        let i = self
            .position(&city, old_display_name)
            .ok_or(RenameError::NotFound)?;

        if old_display_name.trim() != new_display_name && self.position(&city, new_display_name).is_some() {
            return Err(RenameError::NameTaken(new_display_name.into()));
        }

        self.0[i].display_name = new_display_name.into();
        Ok(())
    }
}
