use serde::{Deserialize, Deserializer, Serialize};

/// An authenticated AbrenCare account.
///
/// The backend serializes `id` as an integer primary key; it is kept as a
/// string here so callers never depend on the backend's key type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct User {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default, alias = "profile_image")]
    pub profile_picture: Option<String>,
    #[serde(default)]
    pub date_of_birth: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub is_superuser: bool,
}

impl User {
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            email: None,
            first_name: None,
            last_name: None,
            phone_number: None,
            profile_picture: None,
            date_of_birth: None,
            city: None,
            is_superuser: false,
        }
    }

    /// Name to greet the user with: full name when known, username otherwise.
    pub fn display_name(&self) -> String {
        let first = self.first_name.as_deref().unwrap_or("").trim();
        let last = self.last_name.as_deref().unwrap_or("").trim();
        match (first.is_empty(), last.is_empty()) {
            (true, true) => self.username.clone(),
            (false, true) => first.to_string(),
            (true, false) => last.to_string(),
            (false, false) => format!("{} {}", first, last),
        }
    }
}

/// Partial profile change sent to `PUT profile/<id>/`. Unset fields are
/// left untouched by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
}

impl ProfileUpdate {
    /// Field names accepted by `set`.
    pub const FIELDS: &'static [&'static str] =
        &["email", "first_name", "last_name", "phone_number", "date_of_birth", "city"];

    /// Set a field by its wire name.
    pub fn set(&mut self, field: &str, value: impl Into<String>) -> Result<(), String> {
        let slot = match field {
            "email" => &mut self.email,
            "first_name" => &mut self.first_name,
            "last_name" => &mut self.last_name,
            "phone_number" => &mut self.phone_number,
            "date_of_birth" => &mut self.date_of_birth,
            "city" => &mut self.city,
            other => {
                return Err(format!(
                    "Unknown profile field '{}' (expected one of: {})",
                    other,
                    Self::FIELDS.join(", ")
                ))
            }
        };
        *slot = Some(value.into());
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

fn id_from_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(i64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Number(n) => n.to_string(),
    })
}
