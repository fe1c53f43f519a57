#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use sessionkv::store::SessionStore;
use sessionkv::store::memory::MemoryBackend;
use sessionkv::{CookieOptions, SessionId};

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct TestUser {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct TestPreferences {
    pub theme: String,
    pub language: String,
}

pub fn create_test_user() -> TestUser {
    TestUser {
        id: 1,
        name: "Test User".to_string(),
    }
}

pub fn create_test_preferences() -> TestPreferences {
    TestPreferences {
        theme: "dark".to_string(),
        language: "en".to_string(),
    }
}

pub fn id(value: &str) -> SessionId {
    SessionId::new(value).unwrap()
}

pub fn memory_store() -> SessionStore<MemoryBackend> {
    SessionStore::new(MemoryBackend::new())
}

pub fn build_cookie_options() -> CookieOptions {
    CookieOptions::build()
        .name("test_sess")
        .http_only(true)
        .same_site(cookie::SameSite::Lax)
        .secure(true)
        .max_age(15)
        .path("/")
}
