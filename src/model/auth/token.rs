use std::marker::PhantomData;

use chrono::{serde::ts_seconds, DateTime, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, TokenData, Validation};
use rocket::{
    http::{Cookie, SameSite, Status},
    request::{FromRequest, Outcome},
    time::Duration,
    Request,
};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::Error;

use crate::model::student::SessionKey;

use super::user::{Rights, User};

pub const AUTH_TOKEN_COOKIE: &str = "auth_token";

/// An authentication token representing a specific user with specific rights.
///
/// Student tokens are minted here on login; admin tokens are minted by the
/// external identity provider with the same secret and only verified here.
#[derive(Serialize, Deserialize)]
pub struct AuthToken<U> {
    #[serde(rename = "sub")]
    subject: String,
    #[serde(rename = "rgt")]
    pub rights: Rights,
    /// Key of the login this token was issued for, on student tokens.
    #[serde(rename = "sid", default, skip_serializing_if = "Option::is_none")]
    session: Option<SessionKey>,
    #[serde(skip)]
    phantom: PhantomData<U>,
}

impl<U> AuthToken<U> {
    /// Does this token permit the given rights?
    pub fn permits(&self, target: Rights) -> bool {
        self.rights == target
    }

    /// Bind this token to one login session.
    #[must_use]
    pub fn with_session(mut self, session: SessionKey) -> Self {
        self.session = Some(session);
        self
    }

    /// The session this token was issued for, if any.
    pub fn session(&self) -> Option<&SessionKey> {
        self.session.as_ref()
    }
}

impl<U> AuthToken<U>
where
    U: User,
{
    /// Create a new [`AuthToken`] for the user with the given ID.
    pub fn for_id(id: &U::Id) -> Self {
        Self {
            subject: id.to_string(),
            rights: U::RIGHTS,
            session: None,
            phantom: PhantomData,
        }
    }

    /// The ID of the user this token represents.
    pub fn id(&self) -> U::Id {
        U::Id::from(self.subject.as_str())
    }

    #[allow(clippy::missing_panics_doc)]
    /// Serialize this token into a cookie.
    pub fn into_cookie(self, config: &Config) -> Cookie<'static> {
        let claims = Claims {
            token: self,
            expire_at: Utc::now() + config.auth_ttl(),
        };

        let token = jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(config.jwt_secret()),
        )
        .expect("JWT encoding is infallible with default settings");

        Cookie::build(AUTH_TOKEN_COOKIE, token)
            .max_age(Duration::seconds(config.auth_ttl().num_seconds()))
            .http_only(true)
            .same_site(SameSite::Strict)
            .finish()
    }

    /// Deserialize a token from a cookie.
    pub fn from_cookie(cookie: &Cookie<'_>, config: &Config) -> Result<Self, Error> {
        let token = jsonwebtoken::decode(
            cookie.value(),
            &DecodingKey::from_secret(config.jwt_secret()),
            &Validation::default(),
        )
        .map(|claims: TokenData<Claims<U>>| claims.claims.token)?;
        Ok(token)
    }
}

/// Cookie claims: the token itself plus an expiry datetime.
#[derive(Serialize, Deserialize)]
struct Claims<U> {
    #[serde(flatten, bound = "")]
    token: AuthToken<U>,
    #[serde(rename = "exp", with = "ts_seconds")]
    expire_at: DateTime<Utc>,
}

#[rocket::async_trait]
impl<'r, U> FromRequest<'r> for AuthToken<U>
where
    U: User + Send,
{
    type Error = Error;

    /// Get an [`AuthToken`] from the cookie and verify that it has the correct rights for this user
    /// type.
    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let Some(config) = req.rocket().state::<Config>() else {
            return Outcome::Failure((Status::InternalServerError, Error::Unconfigured("Config")));
        };

        let Some(cookie) = req.cookies().get(AUTH_TOKEN_COOKIE) else {
            return Outcome::Failure((
                Status::Unauthorized,
                Error::Unauthorized("not signed in".to_string()),
            ));
        };

        let token: Self = match Self::from_cookie(cookie, config) {
            Ok(token) => token,
            Err(err) => return Outcome::Failure((Status::Unauthorized, err)),
        };

        // Check it represents the correct rights.
        if !token.permits(U::RIGHTS) {
            return Outcome::Failure((
                Status::Forbidden,
                Error::Forbidden(format!("{} rights required", U::RIGHTS)),
            ));
        }

        Outcome::Success(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{auth::Administrator, ids::StudentId, student::Student};

    fn config() -> Config {
        Config::example()
    }

    #[test]
    fn student_token_roundtrips_through_cookie() {
        let cookie = AuthToken::<Student>::for_id(&StudentId::new("S1")).into_cookie(&config());
        assert_eq!(cookie.name(), AUTH_TOKEN_COOKIE);
        assert_eq!(cookie.http_only(), Some(true));

        let token = AuthToken::<Student>::from_cookie(&cookie, &config()).unwrap();
        assert_eq!(token.id(), StudentId::new("S1"));
        assert!(token.permits(Rights::Student));
        assert!(!token.permits(Rights::Admin));
    }

    #[test]
    fn session_key_survives_the_cookie() {
        let key = SessionKey::generate();
        let cookie = AuthToken::<Student>::for_id(&StudentId::new("S1"))
            .with_session(key.clone())
            .into_cookie(&config());
        let token = AuthToken::<Student>::from_cookie(&cookie, &config()).unwrap();
        assert_eq!(token.session(), Some(&key));

        let bare = AuthToken::<Administrator>::for_id(&"admin".into()).into_cookie(&config());
        let token = AuthToken::<Administrator>::from_cookie(&bare, &config()).unwrap();
        assert_eq!(token.session(), None);
    }

    #[test]
    fn rights_survive_decoding_as_another_user_type() {
        let cookie = AuthToken::<Student>::for_id(&StudentId::new("S1")).into_cookie(&config());
        let token = AuthToken::<Administrator>::from_cookie(&cookie, &config()).unwrap();
        assert!(!token.permits(Rights::Admin));
    }

    #[test]
    fn tampered_cookie_is_rejected() {
        let cookie = AuthToken::<Student>::for_id(&StudentId::new("S1")).into_cookie(&config());
        let tampered = Cookie::new(AUTH_TOKEN_COOKIE, format!("{}x", cookie.value()));
        assert!(AuthToken::<Student>::from_cookie(&tampered, &config()).is_err());
    }
}
