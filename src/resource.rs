//! Provisionable resources.
//!
//! A [`Resource`] knows its singleton key, how to build a fresh payload, how
//! to map itself to and from a stored row, and which snapshot entries it
//! contributes. The bootstrapper is generic over this trait.

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::{
    config::Config,
    error::AppError,
    store::{Record, SingletonKey},
    vapid::VapidKeyPair,
};

pub const VAPID_PUBLIC_KEY_VAR: &str = "VITE_VAPID_PUBLIC_KEY";
pub const VAPID_PRIVATE_KEY_VAR: &str = "VITE_VAPID_PRIVATE_KEY";
pub const SETTINGS_ID_VAR: &str = "VITE_SETTINGS_ID";

pub trait Resource: Sized + Clone + PartialEq + std::fmt::Debug + Send + Sync {
    /// Short name used in logs and errors.
    const NAME: &'static str;

    fn key(config: &Config) -> SingletonKey;

    /// Build a new payload locally. Only called when no record exists.
    fn generate(config: &Config) -> Self;

    fn to_fields(&self) -> Map<String, Value>;

    /// Decode (and check) a stored row.
    fn from_record(record: &Record) -> Result<Self, AppError>;

    /// `KEY=value` pairs this resource adds to the local snapshot.
    fn snapshot_entries(&self) -> Vec<(String, String)>;

    /// Loggable identity of the payload. Must not contain secrets.
    fn describe(&self) -> String;
}

// ── VAPID keys ────────────────────────────────────────────────────────────────

impl Resource for VapidKeyPair {
    const NAME: &'static str = "vapid_keys";

    fn key(config: &Config) -> SingletonKey {
        SingletonKey::new(&config.vapid.table, "id", &config.vapid.id)
    }

    fn generate(_config: &Config) -> Self {
        VapidKeyPair::generate()
    }

    fn to_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("public_key".into(), Value::String(self.public_key.clone()));
        fields.insert("private_key".into(), Value::String(self.private_key.clone()));
        fields
    }

    fn from_record(record: &Record) -> Result<Self, AppError> {
        let keys = VapidKeyPair {
            public_key: record
                .str_field("public_key")
                .map_err(|e| AppError::InvalidRecord(e.to_string()))?
                .to_string(),
            private_key: record
                .str_field("private_key")
                .map_err(|e| AppError::InvalidRecord(e.to_string()))?
                .to_string(),
        };
        keys.validate()?;
        Ok(keys)
    }

    fn snapshot_entries(&self) -> Vec<(String, String)> {
        vec![
            (VAPID_PUBLIC_KEY_VAR.to_string(), self.public_key.clone()),
            (VAPID_PRIVATE_KEY_VAR.to_string(), self.private_key.clone()),
        ]
    }

    fn describe(&self) -> String {
        format!("fingerprint={}", self.fingerprint())
    }
}

// ── Settings row ──────────────────────────────────────────────────────────────

/// The singleton site settings row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteSettings {
    pub id: String,
    pub whatsapp_link: String,
    pub updated_at: Option<String>,
}

impl Resource for SiteSettings {
    const NAME: &'static str = "settings";

    fn key(config: &Config) -> SingletonKey {
        SingletonKey::new(&config.settings.table, "id", &config.settings.id)
    }

    fn generate(config: &Config) -> Self {
        Self {
            id: config.settings.id.clone(),
            whatsapp_link: config.settings.whatsapp_link.clone(),
            updated_at: Some(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        }
    }

    fn to_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("id".into(), Value::String(self.id.clone()));
        fields.insert("whatsapp_link".into(), Value::String(self.whatsapp_link.clone()));
        if let Some(ts) = &self.updated_at {
            fields.insert("updated_at".into(), Value::String(ts.clone()));
        }
        fields
    }

    fn from_record(record: &Record) -> Result<Self, AppError> {
        // `id` may be a text or numeric column.
        let id = match record.fields.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(AppError::InvalidRecord("settings row has no id".into())),
        };
        let whatsapp_link = match record.fields.get("whatsapp_link") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => {
                return Err(AppError::InvalidRecord(format!(
                    "whatsapp_link is not a string: {other}"
                )));
            }
        };
        Ok(Self {
            id,
            whatsapp_link,
            updated_at: record.updated_at().map(str::to_string),
        })
    }

    fn snapshot_entries(&self) -> Vec<(String, String)> {
        vec![(SETTINGS_ID_VAR.to_string(), self.id.clone())]
    }

    fn describe(&self) -> String {
        format!("id={}", self.id)
    }
}
