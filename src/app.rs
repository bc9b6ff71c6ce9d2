//! One bootstrap run.
//!
//! Order of work:
//!   1. Resolve credentials (fatal when either is missing; nothing remote has
//!      been constructed yet)
//!   2. Read the previous snapshot, so an unreadable one fails the run before
//!      any remote work
//!   3. Connect the store
//!   4. Ensure each selected resource, VAPID keys first
//!   5. Assemble the snapshot in memory and write it in one step
//!
//! Any failure before step 5 completes leaves the previous snapshot as it was.

use std::{fmt, path::PathBuf, str::FromStr};

use tracing::info;

use crate::{
    bootstrap::{Bootstrapper, Ensured},
    config::{ANON_KEY_VAR, Config, Credentials, URL_VAR},
    error::AppError,
    resource::{Resource, SiteSettings, VAPID_PRIVATE_KEY_VAR, VAPID_PUBLIC_KEY_VAR},
    snapshot::{self, Snapshot},
    store::RemoteStore,
    vapid::VapidKeyPair,
};

/// Which resources a run provisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Target {
    #[default]
    All,
    Vapid,
    Settings,
}

impl Target {
    fn includes_vapid(self) -> bool {
        matches!(self, Target::All | Target::Vapid)
    }

    fn includes_settings(self) -> bool {
        matches!(self, Target::All | Target::Settings)
    }
}

impl FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Target::All),
            "vapid" => Ok(Target::Vapid),
            "settings" => Ok(Target::Settings),
            other => Err(format!("unknown target '{other}' (expected all, vapid or settings)")),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Target::All => "all",
            Target::Vapid => "vapid",
            Target::Settings => "settings",
        })
    }
}

/// What a successful run resolved and where it wrote the snapshot.
#[derive(Debug)]
pub struct Outcome {
    pub vapid: Option<Ensured<VapidKeyPair>>,
    pub settings: Option<Ensured<SiteSettings>>,
    pub snapshot_path: PathBuf,
}

/// Run the bootstrap for `target`.
///
/// `lookup` supplies credential variables; `connect` builds the store from
/// them and is only called once both are present.
pub async fn run<S, L, C>(config: &Config, target: Target, lookup: L, connect: C) -> Result<Outcome, AppError>
where
    S: RemoteStore,
    L: Fn(&str) -> Option<String>,
    C: FnOnce(&Credentials) -> Result<S, AppError>,
{
    let credentials = Credentials::resolve(lookup)?;
    let previous = snapshot::read_existing(&config.snapshot_path)?;
    let store = connect(&credentials)?;
    info!(url = %credentials.url, %target, "bootstrap starting");

    let bootstrapper = Bootstrapper::new(store, config.clone());

    let vapid = if target.includes_vapid() {
        Some(bootstrapper.ensure::<VapidKeyPair>().await?)
    } else {
        None
    };
    let settings = if target.includes_settings() {
        Some(bootstrapper.ensure::<SiteSettings>().await?)
    } else {
        None
    };

    let mut snap = Snapshot::new(&credentials);
    let mut required = vec![URL_VAR, ANON_KEY_VAR];
    if let Some(v) = &vapid {
        snap.extend(v.payload.snapshot_entries());
        required.extend([VAPID_PUBLIC_KEY_VAR, VAPID_PRIVATE_KEY_VAR]);
    }
    if let Some(s) = &settings {
        snap.extend(s.payload.snapshot_entries());
    }
    let carried = snap.carry_forward(previous);
    snap.require(&required)?;

    snapshot::write_atomic(&config.snapshot_path, &snap.render())?;
    info!(
        path = %config.snapshot_path.display(),
        carried,
        "snapshot written"
    );

    for (name, origin) in [
        (VapidKeyPair::NAME, vapid.as_ref().map(|e| e.origin)),
        (SiteSettings::NAME, settings.as_ref().map(|e| e.origin)),
    ] {
        if let Some(origin) = origin {
            info!(resource = name, origin = origin.as_str(), "resource ready");
        }
    }

    Ok(Outcome {
        vapid,
        settings,
        snapshot_path: config.snapshot_path.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_parses() {
        assert_eq!("all".parse::<Target>().unwrap(), Target::All);
        assert_eq!("vapid".parse::<Target>().unwrap(), Target::Vapid);
        assert_eq!("settings".parse::<Target>().unwrap(), Target::Settings);
        assert!("db".parse::<Target>().is_err());
        assert_eq!(Target::default(), Target::All);
    }

    #[test]
    fn target_selection() {
        assert!(Target::All.includes_vapid() && Target::All.includes_settings());
        assert!(Target::Vapid.includes_vapid() && !Target::Vapid.includes_settings());
        assert!(!Target::Settings.includes_vapid() && Target::Settings.includes_settings());
    }
}
