use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

/// Per-field validation messages, rendered next to the fields.
#[derive(Debug, Default, Clone, Serialize, PartialEq)]
pub struct FormErrors(BTreeMap<String, Vec<String>>);

impl FormErrors {
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.entry(field.into()).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> &[String] {
        self.0.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn required(&mut self, field: &str, value: &str) -> bool {
        if value.trim().is_empty() {
            self.add(field, "This field is required.");
            false
        } else {
            true
        }
    }

    pub fn length(&mut self, field: &str, value: &str, min: usize, max: usize) {
        let len = value.chars().count();
        if len < min || len > max {
            self.add(
                field,
                format!("Field must be between {} and {} characters long.", min, max),
            );
        }
    }

    pub fn email(&mut self, field: &str, value: &str) {
        if !email_regex().is_match(value) {
            self.add(field, "Invalid email address.");
        }
    }

    pub fn equal_to(&mut self, field: &str, value: &str, other: &str, other_name: &str) {
        if value != other {
            self.add(field, format!("Field must be equal to {}.", other_name));
        }
    }
}

fn email_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9!#$%&'*+/=?^_`{|}~.-]+@(?:[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?\.)+[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?$")
            .expect("Regex should compile")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_messages_per_field() {
        let mut errors = FormErrors::default();
        assert!(!errors.required("username", "  "));
        errors.email("email", "not-an-email");
        errors.email("email", "susan@example.com");
        errors.equal_to("password2", "a", "b", "password");
        errors.length("about_me", &"x".repeat(141), 0, 140);

        assert_eq!(errors.get("username"), ["This field is required."]);
        assert_eq!(errors.get("email"), ["Invalid email address."]);
        assert_eq!(errors.get("password2").len(), 1);
        assert_eq!(errors.get("about_me").len(), 1);
        assert!(errors.get("missing").is_empty());
    }
}
