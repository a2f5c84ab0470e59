//! In-memory users service backing `/api/users`

use crate::error::{FieldError, WeaverError, WeaverResult};
use crate::metrics::METRICS;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

const NAME_MIN: usize = 2;
const NAME_MAX: usize = 50;
const AGE_MAX: i32 = 150;

static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[A-Za-z0-9._%+-]+@(?:[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?\.)+[A-Za-z]{2,}$",
    )
    .expect("Invalid regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: u64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<i32>,
}

/// Request body for create, replace and partial update
///
/// Every field is optional so PATCH can reuse it; create and replace
/// validate the whole record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPayload {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub age: Option<i32>,
}

impl UserPayload {
    pub fn new(first_name: &str, last_name: &str, email: &str) -> Self {
        Self {
            first_name: Some(first_name.to_string()),
            last_name: Some(last_name.to_string()),
            email: Some(email.to_string()),
            age: None,
        }
    }

    pub fn with_age(mut self, age: i32) -> Self {
        self.age = Some(age);
        self
    }

    fn into_user(self, id: u64) -> User {
        User {
            id,
            first_name: self.first_name.unwrap_or_default(),
            last_name: self.last_name.unwrap_or_default(),
            email: self.email.unwrap_or_default(),
            age: self.age,
        }
    }
}

pub struct UserService {
    users: RwLock<BTreeMap<u64, User>>,
    next_id: AtomicU64,
}

impl UserService {
    pub fn empty() -> Self {
        Self {
            users: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Service seeded with three sample users
    pub fn new() -> Self {
        let service = Self::empty();
        for (first, last, email) in [
            ("Alice", "Smith", "alice@example.com"),
            ("Bob", "Johnson", "bob@example.com"),
            ("Charlie", "Brown", "charlie@example.com"),
        ] {
            let id = service.next_id.fetch_add(1, Ordering::Relaxed);
            service
                .users
                .write()
                .insert(id, UserPayload::new(first, last, email).into_user(id));
        }
        service
    }

    /// All users, by id
    pub fn list(&self) -> Vec<User> {
        self.users.read().values().cloned().collect()
    }

    pub fn get(&self, id: u64) -> WeaverResult<User> {
        self.users
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| WeaverError::not_found("User", "id", id))
    }

    /// Case-insensitive substring match on every given field
    pub fn search(
        &self,
        first_name: Option<&str>,
        last_name: Option<&str>,
        email: Option<&str>,
    ) -> Vec<User> {
        fn hit(value: &str, needle: Option<&str>) -> bool {
            needle.is_none_or(|n| value.to_lowercase().contains(&n.to_lowercase()))
        }
        self.users
            .read()
            .values()
            .filter(|u| {
                hit(&u.first_name, first_name) && hit(&u.last_name, last_name) && hit(&u.email, email)
            })
            .cloned()
            .collect()
    }

    pub fn create(&self, payload: UserPayload) -> WeaverResult<User> {
        validate(&payload)?;
        let mut users = self.users.write();
        ensure_unique_email(&users, payload.email.as_deref(), None)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let user = payload.into_user(id);
        users.insert(id, user.clone());
        METRICS.record_user_registration();
        info!(user_id = id, email = %user.email, "user created");
        Ok(user)
    }

    /// Replace every field of an existing user
    pub fn update(&self, id: u64, payload: UserPayload) -> WeaverResult<User> {
        validate(&payload)?;
        let mut users = self.users.write();
        if !users.contains_key(&id) {
            return Err(WeaverError::not_found("User", "id", id));
        }
        ensure_unique_email(&users, payload.email.as_deref(), Some(id))?;

        let user = payload.into_user(id);
        users.insert(id, user.clone());
        debug!(user_id = id, "user replaced");
        Ok(user)
    }

    /// Apply the fields present in `patch`; the merged record must still validate
    pub fn patch(&self, id: u64, patch: UserPayload) -> WeaverResult<User> {
        let mut users = self.users.write();
        let existing = users
            .get(&id)
            .ok_or_else(|| WeaverError::not_found("User", "id", id))?;

        let merged = UserPayload {
            first_name: patch.first_name.or_else(|| Some(existing.first_name.clone())),
            last_name: patch.last_name.or_else(|| Some(existing.last_name.clone())),
            email: patch.email.or_else(|| Some(existing.email.clone())),
            age: patch.age.or(existing.age),
        };
        validate(&merged)?;
        ensure_unique_email(&users, merged.email.as_deref(), Some(id))?;

        let user = merged.into_user(id);
        users.insert(id, user.clone());
        debug!(user_id = id, "user patched");
        Ok(user)
    }

    pub fn delete(&self, id: u64) -> WeaverResult<()> {
        match self.users.write().remove(&id) {
            Some(_) => {
                info!(user_id = id, "user deleted");
                Ok(())
            }
            None => Err(WeaverError::not_found("User", "id", id)),
        }
    }

    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }
}

impl Default for UserService {
    fn default() -> Self {
        Self::new()
    }
}

fn ensure_unique_email(
    users: &BTreeMap<u64, User>,
    email: Option<&str>,
    except: Option<u64>,
) -> WeaverResult<()> {
    let Some(email) = email else {
        return Ok(());
    };
    let taken = users
        .values()
        .any(|u| Some(u.id) != except && u.email.eq_ignore_ascii_case(email));
    if taken {
        return Err(WeaverError::conflict(format!(
            "email already registered: {}",
            email
        )));
    }
    Ok(())
}

fn validate(payload: &UserPayload) -> WeaverResult<()> {
    let mut fields = Vec::new();
    let mut fail = |field: &str, message: &str| {
        fields.push(FieldError {
            field: field.to_string(),
            message: message.to_string(),
        })
    };

    for (field, label, value) in [
        ("firstName", "First name", &payload.first_name),
        ("lastName", "Last name", &payload.last_name),
    ] {
        match value.as_deref().map(str::trim) {
            None | Some("") => fail(field, &format!("{} is required", label)),
            Some(_) => {
                let len = value.as_deref().map_or(0, |v| v.chars().count());
                if !(NAME_MIN..=NAME_MAX).contains(&len) {
                    fail(
                        field,
                        &format!("{} must be {}-{} characters", label, NAME_MIN, NAME_MAX),
                    );
                }
            }
        }
    }

    match payload.email.as_deref().map(str::trim) {
        None | Some("") => fail("email", "Email is required"),
        Some(email) if !is_email(email) => fail("email", "Invalid email format"),
        Some(_) => {}
    }

    match payload.age {
        Some(age) if age < 0 => fail("age", "Age must be positive"),
        Some(age) if age > AGE_MAX => fail("age", "Age must be less than 150"),
        _ => {}
    }

    if fields.is_empty() {
        Ok(())
    } else {
        Err(WeaverError::Validation { fields })
    }
}

fn is_email(value: &str) -> bool {
    EMAIL_PATTERN.is_match(value)
}
