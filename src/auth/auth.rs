use actix_web::{FromRequest, HttpMessage, HttpRequest, dev::Payload};
use futures::future::{Ready, ready};

use crate::{error::ApiError, model::role::Role};

/// Caller identity, placed into request extensions by `auth_middleware`.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: u64,
    pub email: String,
    pub role: Role,
}

impl FromRequest for AuthUser {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(
            req.extensions()
                .get::<AuthUser>()
                .cloned()
                .ok_or_else(|| ApiError::Unauthorized("Missing token".to_string())),
        )
    }
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn is_teacher(&self) -> bool {
        self.role == Role::Teacher
    }

    pub fn is_student(&self) -> bool {
        self.role == Role::Student
    }

    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ApiError::forbidden("Admin only"))
        }
    }

    /// Admin or teacher.
    pub fn require_staff(&self) -> Result<(), ApiError> {
        if matches!(self.role, Role::Admin | Role::Teacher) {
            Ok(())
        } else {
            Err(ApiError::forbidden("Teacher/Admin only"))
        }
    }

    /// Students may only look at their own data.
    pub fn require_self_or_staff(&self, student_id: u64) -> Result<(), ApiError> {
        if self.is_student() && self.user_id != student_id {
            return Err(ApiError::forbidden("Students can only view their own attendance"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: Role) -> AuthUser {
        AuthUser {
            user_id: 5,
            email: "u@school.test".to_string(),
            role,
        }
    }

    #[test]
    fn guards_follow_roles() {
        assert!(user(Role::Admin).require_admin().is_ok());
        assert!(user(Role::Teacher).require_admin().is_err());

        assert!(user(Role::Teacher).require_staff().is_ok());
        assert!(user(Role::Admin).require_staff().is_ok());
        assert!(user(Role::Student).require_staff().is_err());
    }

    #[test]
    fn students_see_only_themselves() {
        let student = user(Role::Student);
        assert!(student.require_self_or_staff(5).is_ok());
        assert!(student.require_self_or_staff(6).is_err());
        assert!(user(Role::Teacher).require_self_or_staff(6).is_ok());
    }
}
