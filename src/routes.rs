use std::convert::Infallible;
use std::sync::Arc;

use cookie::{Cookie, SameSite};
use log::{debug, error, info};
use serde::de::DeserializeOwned;
use serde::Serialize;
use warp::http::{self, header, HeaderValue, Uri};
use warp::hyper::body::Bytes;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

use crate::app::{
    App, CallbackQuery, CitySubmission, CookieUpdate, DeleteRequest, EditRequest, Error,
    PhoneSendRequest, PhoneVerifyRequest, TokenRequest, Visit,
};
use crate::auth::Identity;
use crate::session::Session;

const SESSION_COOKIE: &str = "sessionid";
const BODY_LIMIT: u64 = 16 * 1024;

/// JSON acknowledgement for the fetch()-driven endpoints.
#[serde_with::skip_serializing_none]
#[derive(Debug, Serialize)]
struct Ack {
    success: bool,
    error: Option<String>,
    user: Option<Identity>,
}

impl Ack {
    fn ok() -> Self {
        Self {
            success: true,
            error: None,
            user: None,
        }
    }

    fn signed_in(user: Identity) -> Self {
        Self {
            user: Some(user),
            ..Self::ok()
        }
    }
}

fn json_reply(result: Result<Ack, Error>) -> Response {
    match result {
        Ok(ack) => warp::reply::json(&ack).into_response(),
        Err(e) => {
            let status: http::StatusCode = (&e).into();
            let ack = Ack {
                success: false,
                error: Some(e.to_string()),
                user: None,
            };
            warp::reply::with_status(warp::reply::json(&ack), status).into_response()
        }
    }
}

fn parse_json<T: DeserializeOwned>(body: &Bytes) -> Result<T, Error> {
    serde_json::from_slice(body).map_err(|e| {
        debug!("bad json body: {e}");
        Error::BadRequest("Invalid request body".into())
    })
}

fn internal_error() -> Response {
    warp::reply::with_status(
        warp::reply::html("<h1>Something went wrong</h1>"),
        http::StatusCode::INTERNAL_SERVER_ERROR,
    )
    .into_response()
}

async fn index_page(app: &App, session: &mut Session, submission: Option<CitySubmission>) -> Response {
    let page = app.index(session, submission).await;

    match app.templates().index(&page) {
        Ok(body) => warp::reply::html(body).into_response(),
        Err(e) => {
            error!("couldn't render index: {e}");
            internal_error()
        }
    }
}

fn auth_page(app: &App, visit: &Visit, error: Option<&Error>) -> Response {
    let rendered = app.templates().auth(
        app.sign_in_options(),
        visit.session.identity(),
        error.map(ToString::to_string).as_deref(),
    );

    match rendered {
        Ok(body) => {
            let status = error.map(Into::into).unwrap_or(http::StatusCode::OK);
            warp::reply::with_status(warp::reply::html(body), status).into_response()
        }
        Err(e) => {
            error!("couldn't render auth page: {e}");
            internal_error()
        }
    }
}

fn redirect(to: &str) -> Response {
    match to.parse::<Uri>() {
        Ok(uri) => warp::redirect::see_other(uri).into_response(),
        Err(e) => {
            error!("invalid redirect target: {e}");
            internal_error()
        }
    }
}

fn session_cookie(update: CookieUpdate, secure: bool) -> Option<String> {
    let value = match update {
        CookieUpdate::Keep => return None,
        CookieUpdate::Set(id) => id.to_string(),
        CookieUpdate::Clear => String::new(),
    };
    let clear = value.is_empty();

    let mut cookie = Cookie::build((SESSION_COOKIE, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .build();
    if clear {
        cookie.set_max_age(cookie::time::Duration::ZERO);
    }

    Some(cookie.to_string())
}

/// Writes the session back and attaches whatever cookie change that needs.
async fn finish(app: &App, visit: Visit, mut response: Response, secure: bool) -> Response {
    let update = app.finish(visit).await;

    if let Some(cookie) = session_cookie(update, secure) {
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
            Err(e) => error!("couldn't encode session cookie: {e}"),
        }
    }

    response
}

async fn rejection(err: Rejection) -> Result<Response, Infallible> {
    let status = if err.is_not_found() {
        http::StatusCode::NOT_FOUND
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        http::StatusCode::METHOD_NOT_ALLOWED
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        http::StatusCode::PAYLOAD_TOO_LARGE
    } else if err.find::<warp::filters::body::BodyDeserializeError>().is_some() {
        http::StatusCode::BAD_REQUEST
    } else {
        error!("unhandled rejection: {err:?}");
        http::StatusCode::INTERNAL_SERVER_ERROR
    };

    let reason = status.canonical_reason().unwrap_or("Error");
    Ok(warp::reply::with_status(reason, status).into_response())
}

pub fn routes(
    app: Arc<App>,
    secure: bool,
) -> impl Filter<Extract = (Response,), Error = Infallible> + Clone {
    let with_app = warp::any().map(move || Arc::clone(&app));

    let visit = with_app
        .clone()
        .and(warp::cookie::optional::<String>(SESSION_COOKIE))
        .then(|app: Arc<App>, cookie: Option<String>| async move {
            app.begin(cookie.as_deref()).await
        });

    let json_body = warp::body::content_length_limit(BODY_LIMIT).and(warp::body::bytes());

    let index = {
        let get = warp::path::end()
            .and(warp::get())
            .and(with_app.clone())
            .and(visit.clone())
            .then(move |app: Arc<App>, mut visit: Visit| async move {
                let response = index_page(&app, &mut visit.session, None).await;
                finish(&app, visit, response, secure).await
            });

        let post = warp::path::end()
            .and(warp::post())
            .and(with_app.clone())
            .and(visit.clone())
            .and(warp::body::content_length_limit(BODY_LIMIT))
            .and(warp::body::form::<CitySubmission>())
            .then(move |app: Arc<App>, mut visit: Visit, submission: CitySubmission| async move {
                let response = index_page(&app, &mut visit.session, Some(submission)).await;
                finish(&app, visit, response, secure).await
            });

        get.or(post).unify()
    };

    let locations = {
        let delete = warp::path!("delete_location")
            .and(warp::post())
            .and(with_app.clone())
            .and(visit.clone())
            .and(json_body.clone())
            .then(move |app: Arc<App>, mut visit: Visit, body: Bytes| async move {
                let result = parse_json::<DeleteRequest>(&body)
                    .and_then(|req| app.delete_location(&mut visit.session, req))
                    .map(|()| Ack::ok());
                finish(&app, visit, json_reply(result), secure).await
            });

        let edit = warp::path!("edit_location")
            .and(warp::post())
            .and(with_app.clone())
            .and(visit.clone())
            .and(json_body.clone())
            .then(move |app: Arc<App>, mut visit: Visit, body: Bytes| async move {
                let result = parse_json::<EditRequest>(&body)
                    .and_then(|req| app.edit_location(&mut visit.session, req))
                    .map(|()| Ack::ok());
                finish(&app, visit, json_reply(result), secure).await
            });

        delete.or(edit).unify()
    };

    let auth = {
        let page = warp::path!("auth")
            .and(warp::get())
            .and(with_app.clone())
            .and(visit.clone())
            .then(move |app: Arc<App>, visit: Visit| async move {
                let response = auth_page(&app, &visit, None);
                finish(&app, visit, response, secure).await
            });

        let google_start = warp::path!("auth" / "google")
            .and(warp::get())
            .and(with_app.clone())
            .and(visit.clone())
            .then(move |app: Arc<App>, mut visit: Visit| async move {
                let response = match app.google_authorize(&mut visit.session) {
                    Ok(url) => redirect(&url),
                    Err(e) => auth_page(&app, &visit, Some(&e)),
                };
                finish(&app, visit, response, secure).await
            });

        let google_callback = warp::path!("auth" / "google" / "callback")
            .and(warp::get())
            .and(with_app.clone())
            .and(visit.clone())
            .and(warp::query::<CallbackQuery>())
            .then(move |app: Arc<App>, mut visit: Visit, query: CallbackQuery| async move {
                let response = match app.google_callback(&mut visit.session, query).await {
                    Ok(_) => redirect("/"),
                    Err(e) => auth_page(&app, &visit, Some(&e)),
                };
                finish(&app, visit, response, secure).await
            });

        let google_token = warp::path!("auth" / "google")
            .and(warp::post())
            .and(with_app.clone())
            .and(visit.clone())
            .and(json_body.clone())
            .then(move |app: Arc<App>, mut visit: Visit, body: Bytes| async move {
                let result = match parse_json::<TokenRequest>(&body) {
                    Ok(req) => app.google_token(&mut visit.session, req).await.map(Ack::signed_in),
                    Err(e) => Err(e),
                };
                finish(&app, visit, json_reply(result), secure).await
            });

        let phone_send = warp::path!("auth" / "phone" / "send")
            .and(warp::post())
            .and(with_app.clone())
            .and(json_body.clone())
            .then(|app: Arc<App>, body: Bytes| async move {
                let result = match parse_json::<PhoneSendRequest>(&body) {
                    Ok(req) => app.phone_send(req).await.map(|()| Ack::ok()),
                    Err(e) => Err(e),
                };
                json_reply(result)
            });

        let phone_verify = warp::path!("auth" / "phone" / "verify")
            .and(warp::post())
            .and(with_app.clone())
            .and(visit.clone())
            .and(json_body.clone())
            .then(move |app: Arc<App>, mut visit: Visit, body: Bytes| async move {
                let result = match parse_json::<PhoneVerifyRequest>(&body) {
                    Ok(req) => app.phone_verify(&mut visit.session, req).await.map(Ack::signed_in),
                    Err(e) => Err(e),
                };
                finish(&app, visit, json_reply(result), secure).await
            });

        page.or(google_start)
            .unify()
            .or(google_callback)
            .unify()
            .or(google_token)
            .unify()
            .or(phone_send)
            .unify()
            .or(phone_verify)
            .unify()
    };

    let logout = warp::path!("logout")
        .and(warp::get())
        .and(with_app.clone())
        .and(visit.clone())
        .then(move |app: Arc<App>, mut visit: Visit| async move {
            if let Some(who) = visit.session.identity() {
                info!("{} signed out", who.id);
            }
            visit.end();
            finish(&app, visit, redirect("/"), secure).await
        });

    index
        .or(locations)
        .unify()
        .or(auth)
        .unify()
        .or(logout)
        .unify()
        .recover(rejection)
        .unify()
}

#[cfg(test)]
mod test {
    use super::*;

    use serde_json::{json, Value};

    use crate::app::test::app_with;
    use crate::auth::Outbox;
    use crate::session::SessionId;

    type Res = http::Response<Bytes>;

    /// Carries the session cookie between requests like a browser would.
    #[derive(Default)]
    struct Browser {
        cookie: Option<String>,
    }

    fn set_cookie(res: &Res) -> Option<&str> {
        res.headers().get(header::SET_COOKIE)?.to_str().ok()
    }

    fn body_json(res: &Res) -> Value {
        serde_json::from_slice(res.body()).unwrap()
    }

    fn body_text(res: &Res) -> String {
        String::from_utf8(res.body().to_vec()).unwrap()
    }

    fn location(res: &Res) -> String {
        res.headers()[header::LOCATION].to_str().unwrap().to_string()
    }

    impl Browser {
        async fn send<F>(&mut self, filter: &F, req: warp::test::RequestBuilder) -> Res
        where
            F: Filter<Extract = (Response,), Error = Infallible> + Clone + 'static,
        {
            let req = match &self.cookie {
                Some(id) => req.header("cookie", format!("{SESSION_COOKIE}={id}")),
                None => req,
            };
            let res = req.reply(filter).await;

            if let Some(set) = set_cookie(&res) {
                let cookie = Cookie::parse(set.to_string()).unwrap();
                self.cookie = Some(cookie.value().to_string()).filter(|v| !v.is_empty());
            }
            res
        }

        async fn get<F>(&mut self, filter: &F, path: &str) -> Res
        where
            F: Filter<Extract = (Response,), Error = Infallible> + Clone + 'static,
        {
            self.send(filter, warp::test::request().method("GET").path(path))
                .await
        }

        async fn form<F>(&mut self, filter: &F, path: &str, body: &str) -> Res
        where
            F: Filter<Extract = (Response,), Error = Infallible> + Clone + 'static,
        {
            let req = warp::test::request()
                .method("POST")
                .path(path)
                .header("content-type", "application/x-www-form-urlencoded")
                .body(body.to_string());
            self.send(filter, req).await
        }

        async fn json<F>(&mut self, filter: &F, path: &str, body: Value) -> Res
        where
            F: Filter<Extract = (Response,), Error = Infallible> + Clone + 'static,
        {
            let req = warp::test::request()
                .method("POST")
                .path(path)
                .header("content-type", "application/json")
                .body(body.to_string());
            self.send(filter, req).await
        }
    }

    fn setup() -> (
        Browser,
        Arc<Outbox>,
        impl Filter<Extract = (Response,), Error = Infallible> + Clone + 'static,
    ) {
        let outbox = Arc::new(Outbox::default());
        let filter = routes(Arc::new(app_with(outbox.clone())), false);
        (Browser::default(), outbox, filter)
    }

    #[tokio::test]
    async fn first_visit_sets_cookie() {
        let (mut browser, _, filter) = setup();

        let res = browser.get(&filter, "/").await;
        assert_eq!(res.status(), 200);

        let set = set_cookie(&res).unwrap();
        assert!(set.starts_with("sessionid="));
        assert!(set.contains("HttpOnly"));
        assert!(browser.cookie.as_deref().unwrap().parse::<SessionId>().is_ok());

        // known session: no new cookie
        let res = browser.get(&filter, "/").await;
        assert!(set_cookie(&res).is_none());
    }

    #[tokio::test]
    async fn save_rename_delete() {
        let (mut browser, _, filter) = setup();

        let res = browser
            .form(&filter, "/", "city=London&save=on&display_name=Home")
            .await;
        assert_eq!(res.status(), 200);
        let html = body_text(&res);
        assert!(html.contains("London, United Kingdom"));
        assert!(html.contains("Saved Home"));

        let res = browser
            .json(
                &filter,
                "/edit_location",
                json!({ "city": "London", "name": "Home", "new_name": "Flat" }),
            )
            .await;
        assert_eq!(body_json(&res), json!({ "success": true }));

        let res = browser
            .json(&filter, "/delete_location", json!({ "city": "london", "name": "Home" }))
            .await;
        assert_eq!(res.status(), 404);
        assert_eq!(
            body_json(&res),
            json!({ "success": false, "error": "Location not found" })
        );

        let res = browser
            .json(&filter, "/delete_location", json!({ "city": "london", "name": "Flat" }))
            .await;
        assert_eq!(body_json(&res), json!({ "success": true }));

        let res = browser.get(&filter, "/").await;
        assert!(body_text(&res).contains("No saved places yet."));
    }

    #[tokio::test]
    async fn favorites_are_per_session() {
        let (mut alice, _, filter) = setup();
        let mut bob = Browser::default();

        alice.form(&filter, "/", "city=Cairo&save=on").await;
        let res = bob.get(&filter, "/").await;

        assert!(!body_text(&res).contains("Cairo, Egypt"));
        assert_ne!(alice.cookie, bob.cookie);
    }

    #[tokio::test]
    async fn rename_as_the_page_sends_it() {
        let (mut browser, _, filter) = setup();
        browser.form(&filter, "/", "city=Paris&save=on&display_name=Trip").await;
        browser.form(&filter, "/", "city=Paris&save=on&display_name=Work").await;

        let res = browser
            .json(
                &filter,
                "/edit_location",
                json!({ "city": "paris", "old_name": "Trip", "new_name": "Holiday" }),
            )
            .await;
        assert_eq!(body_json(&res), json!({ "success": true }));

        let res = browser
            .json(
                &filter,
                "/edit_location",
                json!({ "city": "paris", "old_name": "Holiday", "new_name": "Work" }),
            )
            .await;
        assert_eq!(res.status(), 400);
        assert_eq!(
            body_json(&res),
            json!({
                "success": false,
                "error": "You already have a location called \"Work\" for this city"
            })
        );

        let html = body_text(&browser.get(&filter, "/").await);
        assert!(html.contains("data-name=\"Holiday\""));
        assert!(html.contains("data-name=\"Work\""));
    }

    #[tokio::test]
    async fn weather_error_is_rendered() {
        let (mut browser, _, filter) = setup();

        let res = browser.form(&filter, "/", "city=Atlantis").await;

        assert_eq!(res.status(), 200);
        assert!(body_text(&res).contains("No matching location found."));
    }

    #[tokio::test]
    async fn malformed_json_is_acknowledged() {
        let (mut browser, _, filter) = setup();

        let req = warp::test::request()
            .method("POST")
            .path("/edit_location")
            .header("content-type", "application/json")
            .body("{not json");
        let res = browser.send(&filter, req).await;
        assert_eq!(res.status(), 400);
        assert_eq!(body_json(&res)["success"], json!(false));

        let res = browser
            .json(&filter, "/delete_location", json!({ "name": "x" }))
            .await;
        assert_eq!(
            body_json(&res),
            json!({ "success": false, "error": "City is required" })
        );
    }

    #[tokio::test]
    async fn foreign_google_token_leaves_session_anonymous() {
        let (mut browser, _, filter) = setup();

        let res = browser
            .json(&filter, "/auth/google", json!({ "credential": "foreign-token" }))
            .await;
        assert_eq!(res.status(), 401);
        assert_eq!(body_json(&res)["success"], json!(false));

        let res = browser.get(&filter, "/").await;
        assert!(!body_text(&res).contains("Sign out"));
    }

    #[tokio::test]
    async fn cancelled_google_consent() {
        let (mut browser, _, filter) = setup();
        browser.get(&filter, "/auth/google").await;

        let res = browser
            .get(&filter, "/auth/google/callback?error=access_denied")
            .await;

        assert_eq!(res.status(), 401);
        assert!(body_text(&res).contains("Google sign-in was cancelled"));
        let html = body_text(&browser.get(&filter, "/").await);
        assert!(!html.contains("Sign out"));
    }

    #[tokio::test]
    async fn sign_in_issues_new_cookie() {
        let (mut browser, _, filter) = setup();
        browser.get(&filter, "/").await;
        let before = browser.cookie.clone();

        browser
            .json(&filter, "/auth/google", json!({ "credential": "good" }))
            .await;
        assert!(browser.cookie.is_some());
        assert_ne!(browser.cookie, before);

        // the pre-sign-in cookie is no longer signed in
        let mut other = Browser { cookie: before };
        let html = body_text(&other.get(&filter, "/").await);
        assert!(!html.contains("Sign out"));

        let html = body_text(&browser.get(&filter, "/").await);
        assert!(html.contains("Sign out"));
    }

    #[tokio::test]
    async fn google_token_signs_in() {
        let (mut browser, _, filter) = setup();

        let res = browser
            .json(&filter, "/auth/google", json!({ "credential": "good" }))
            .await;
        let ack = body_json(&res);

        assert_eq!(ack["success"], json!(true));
        assert_eq!(ack["user"]["email"], json!("ada@example.com"));
        assert_eq!(ack["user"]["method"], json!("google"));
    }

    #[tokio::test]
    async fn google_redirect_round_trip() {
        let (mut browser, _, filter) = setup();

        let res = browser.get(&filter, "/auth/google").await;
        assert_eq!(res.status(), 303);
        let url = location(&res);
        let state = url.rsplit("state=").next().unwrap();

        let forged = browser
            .get(&filter, "/auth/google/callback?code=good-code&state=forged")
            .await;
        assert_eq!(forged.status(), 401);

        // the forged attempt used up the state
        let path = format!("/auth/google/callback?code=good-code&state={state}");
        let res = browser.get(&filter, &path).await;
        assert_eq!(res.status(), 401);

        let res = browser.get(&filter, "/auth/google").await;
        let url = location(&res);
        let state = url.rsplit("state=").next().unwrap();
        let path = format!("/auth/google/callback?code=good-code&state={state}");
        let res = browser.get(&filter, &path).await;
        assert_eq!(res.status(), 303);
        assert_eq!(location(&res), "/");

        let html = body_text(&browser.get(&filter, "/").await);
        assert!(html.contains("Ada"));
        assert!(html.contains("Sign out"));
    }

    #[tokio::test]
    async fn phone_sign_in_then_logout() {
        let (mut browser, outbox, filter) = setup();

        let res = browser
            .json(&filter, "/auth/phone/send", json!({ "phone": "nope" }))
            .await;
        assert_eq!(res.status(), 400);

        let res = browser
            .json(&filter, "/auth/phone/send", json!({ "phone": "+15551234567" }))
            .await;
        assert_eq!(body_json(&res), json!({ "success": true }));

        let res = browser
            .json(
                &filter,
                "/auth/phone/verify",
                json!({ "phone": "+15551234567", "code": outbox.last_code() }),
            )
            .await;
        let ack = body_json(&res);
        assert_eq!(ack["success"], json!(true));
        assert_eq!(ack["user"]["method"], json!("phone"));

        let signed_in = browser.cookie.clone();

        let res = browser.get(&filter, "/logout").await;
        assert_eq!(res.status(), 303);
        assert!(set_cookie(&res).unwrap().contains("Max-Age=0"));
        assert!(browser.cookie.is_none());

        // the old session id is dead
        browser.cookie = signed_in;
        let res = browser.get(&filter, "/").await;
        assert!(set_cookie(&res).is_some());
        assert!(!body_text(&res).contains("Sign out"));
    }

    #[tokio::test]
    async fn auth_page() {
        let (mut browser, _, filter) = setup();

        let res = browser.get(&filter, "/auth").await;

        assert_eq!(res.status(), 200);
        assert!(body_text(&res).contains("phone-send-form"));
    }

    #[tokio::test]
    async fn unknown_route() {
        let (mut browser, _, filter) = setup();

        let res = browser.get(&filter, "/nowhere").await;
        assert_eq!(res.status(), 404);

        let res = browser.get(&filter, "/delete_location").await;
        assert_eq!(res.status(), 405);
    }
}
