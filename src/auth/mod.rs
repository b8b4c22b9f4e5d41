//! Teacher authentication adapter.
//!
//! Out of scope per the design (§1): the core never constructs a JWT or
//! touches a password hash directly. `register` only ever calls
//! [`TeacherAuthenticator::verify`]. [`JwtTeacherAuthenticator`] is the
//! default implementation, following the teacher's JWT-claim conventions
//! (HS256, a `sub` claim carrying the durable user id) but without the
//! session-cookie rotation, 2FA or password-reset machinery that belongs to
//! a full account system rather than this relay.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::DbConn;
use crate::models::TeacherUser;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing or malformed bearer token")]
    MalformedToken,
    #[error("token signature or claims invalid: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
    #[error("teacher user not found")]
    UserNotFound,
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeacherIdentity {
    pub teacher_id: i32,
    pub username: String,
}

/// Bearer-token verification + teacher lookup, consumed only by the
/// `register` handler. Swappable so a real identity provider can replace the
/// JWT default without the WS layer changing.
pub trait TeacherAuthenticator: Send + Sync {
    fn verify(
        &self,
        token: &str,
        conn: &mut DbConn,
    ) -> Result<TeacherIdentity, AuthError>;
}

pub type SharedTeacherAuthenticator = Arc<dyn TeacherAuthenticator>;

#[derive(Debug, Serialize, Deserialize)]
struct TeacherClaims {
    sub: i32,
    exp: usize,
}

pub struct JwtTeacherAuthenticator {
    decoding_key: jsonwebtoken::DecodingKey,
    validation: jsonwebtoken::Validation,
}

impl JwtTeacherAuthenticator {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            decoding_key: jsonwebtoken::DecodingKey::from_secret(secret),
            validation: jsonwebtoken::Validation::default(),
        }
    }
}

impl TeacherAuthenticator for JwtTeacherAuthenticator {
    fn verify(
        &self,
        token: &str,
        conn: &mut DbConn,
    ) -> Result<TeacherIdentity, AuthError> {
        let token = token.strip_prefix("Bearer ").unwrap_or(token);
        if token.is_empty() {
            return Err(AuthError::MalformedToken);
        }

        let claims = jsonwebtoken::decode::<TeacherClaims>(
            token,
            &self.decoding_key,
            &self.validation,
        )?
        .claims;

        use crate::schema::teacher_users::dsl::*;
        let user: TeacherUser = teacher_users
            .filter(id.eq(claims.sub))
            .first(conn)
            .map_err(|err| match err {
                diesel::result::Error::NotFound => AuthError::UserNotFound,
                other => AuthError::Database(other),
            })?;

        Ok(TeacherIdentity {
            teacher_id: user.id,
            username: user.username,
        })
    }
}

/// Resolves a pre-verified numeric id directly, bypassing JWT decoding.
///
/// This mirrors the `teacherId` field the `register` message allows when an
/// upstream gateway has already authenticated the caller (see §6 inbound
/// frame shape); it still requires the id to resolve to a real user so the
/// "first teacher owns the session" invariant (§4.4) can't be spoofed.
pub struct PreVerifiedTeacherAuthenticator;

impl TeacherAuthenticator for PreVerifiedTeacherAuthenticator {
    fn verify(
        &self,
        token: &str,
        conn: &mut DbConn,
    ) -> Result<TeacherIdentity, AuthError> {
        let teacher_id: i32 =
            token.parse().map_err(|_| AuthError::MalformedToken)?;

        use crate::schema::teacher_users::dsl::*;
        let user: TeacherUser = teacher_users
            .filter(id.eq(teacher_id))
            .first(conn)
            .map_err(|err| match err {
                diesel::result::Error::NotFound => AuthError::UserNotFound,
                other => AuthError::Database(other),
            })?;

        Ok(TeacherIdentity {
            teacher_id: user.id,
            username: user.username,
        })
    }
}

/// The `register` handler coalesces `teacherToken`/`teacherId` into one
/// string (§6) without saying which was supplied, so the installed
/// authenticator has to tell them apart itself: a token made entirely of
/// digits is a pre-verified id, anything else is treated as a JWT.
pub struct CompositeTeacherAuthenticator {
    jwt: JwtTeacherAuthenticator,
    pre_verified: PreVerifiedTeacherAuthenticator,
}

impl CompositeTeacherAuthenticator {
    pub fn new(jwt_secret: &[u8]) -> Self {
        Self {
            jwt: JwtTeacherAuthenticator::new(jwt_secret),
            pre_verified: PreVerifiedTeacherAuthenticator,
        }
    }
}

impl TeacherAuthenticator for CompositeTeacherAuthenticator {
    fn verify(
        &self,
        token: &str,
        conn: &mut DbConn,
    ) -> Result<TeacherIdentity, AuthError> {
        if !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit()) {
            self.pre_verified.verify(token, conn)
        } else {
            self.jwt.verify(token, conn)
        }
    }
}

pub mod password {
    use argon2::password_hash::{self, SaltString, rand_core::OsRng};
    use argon2::{Argon2, PasswordHasher};
    use std::sync::LazyLock;

    static ARGON2: LazyLock<Argon2<'static>> = LazyLock::new(Argon2::default);

    pub fn hash(password: &str) -> Result<String, password_hash::Error> {
        let salt = SaltString::generate(&mut OsRng);
        ARGON2
            .hash_password(password.as_bytes(), &salt)
            .map(|ph| ph.to_string())
    }
}
