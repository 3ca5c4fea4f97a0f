use minijinja::{context, Environment};

use crate::app::{Page, SignInOptions};
use crate::auth::Identity;

/// Page templates, compiled into the binary. Auto-escaping is on for both
/// since they're named `.html`.
pub struct Templates {
    env: Environment<'static>,
}

impl Templates {
    pub fn new() -> Result<Self, minijinja::Error> {
        let mut env = Environment::new();

        env.add_template("base.html", include_str!("../templates/base.html"))?;
        env.add_template("index.html", include_str!("../templates/index.html"))?;
        env.add_template("auth.html", include_str!("../templates/auth.html"))?;

        Ok(Self { env })
    }

    pub fn index(&self, page: &Page) -> Result<String, minijinja::Error> {
        self.env.get_template("index.html")?.render(page)
    }

    pub fn auth(
        &self,
        options: &SignInOptions,
        user: Option<&Identity>,
        error: Option<&str>,
    ) -> Result<String, minijinja::Error> {
        self.env.get_template("auth.html")?.render(context! {
            options => options,
            user => user,
            error => error,
        })
    }
}
