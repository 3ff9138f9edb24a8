//! Config subcommand handlers.

use std::fmt::Write as _;

use dialoguer::{Input, Select};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config::{self, Config, Profile};
use crate::error::CliError;
use crate::output;

const REDACTED: &str = "****";

// ── Helpers ─────────────────────────────────────────────────────────

/// Copy of the config with plaintext passwords masked.
fn redacted(cfg: &Config) -> Config {
    let mut cfg = cfg.clone();
    for profile in cfg.profiles.values_mut() {
        if profile.password.is_some() {
            profile.password = Some(REDACTED.into());
        }
    }
    cfg
}

/// Format config for display. Expects an already redacted config.
fn format_config(cfg: &Config) -> String {
    let mut out = String::new();

    if let Some(ref default) = cfg.default_profile {
        let _ = writeln!(out, "default_profile = \"{default}\"");
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "[defaults]");
    let _ = writeln!(out, "output = \"{}\"", cfg.defaults.output);
    let _ = writeln!(out, "color = \"{}\"", cfg.defaults.color);
    let _ = writeln!(out, "timeout = {}", cfg.defaults.timeout);

    let mut names: Vec<_> = cfg.profiles.keys().collect();
    names.sort();
    for name in names {
        let p = &cfg.profiles[name];
        let _ = writeln!(out);
        let _ = writeln!(out, "[profiles.{name}]");
        if let Some(ref url) = p.api_url {
            let _ = writeln!(out, "api_url = \"{url}\"");
        }
        if let Some(house) = p.house_id {
            let _ = writeln!(out, "house_id = {house}");
        }
        if let Some(ref u) = p.username {
            let _ = writeln!(out, "username = \"{u}\"");
        }
        if let Some(ref pw) = p.password {
            let _ = writeln!(out, "password = \"{pw}\"");
        }
        if let Some(ref env) = p.password_env {
            let _ = writeln!(out, "password_env = \"{env}\"");
        }
        if let Some(timeout) = p.timeout {
            let _ = writeln!(out, "timeout = {timeout}");
        }
        let s = &p.sync;
        let _ = writeln!(
            out,
            "sync = {{ auto_sync = {}, interval_minutes = {}, create_missing_floors = {}, create_missing_areas = {} }}",
            s.auto_sync, s.interval_minutes, s.create_missing_floors, s.create_missing_areas
        );
        for (room, variant) in &p.room_variants {
            let _ = writeln!(out, "room_variants.{room} = \"{variant}\"");
        }
    }

    out.trim_end().to_owned()
}

fn available_profiles(cfg: &Config) -> String {
    let mut names: Vec<_> = cfg.profiles.keys().cloned().collect();
    names.sort();
    if names.is_empty() {
        "(none)".into()
    } else {
        names.join(", ")
    }
}

/// Map a dialoguer / interactive I/O failure into CliError.
fn prompt_err(e: impl std::fmt::Display) -> CliError {
    CliError::Validation {
        field: "interactive".into(),
        reason: format!("prompt failed: {e}"),
    }
}

fn prompt_password() -> Result<String, CliError> {
    let pass = rpassword::prompt_password("Password: ").map_err(prompt_err)?;
    if pass.is_empty() {
        return Err(CliError::Validation {
            field: "password".into(),
            reason: "password cannot be empty".into(),
        });
    }
    Ok(pass)
}

/// Offer the keyring or plaintext config for the password.
///
/// Returns `Some(password)` if the user chose plaintext, `None` if stored
/// in the keyring.
fn prompt_password_storage(profile_name: &str, password: &str) -> Result<Option<String>, CliError> {
    let choices = &[
        "Store in system keyring (recommended)",
        "Save to config file (plaintext)",
    ];
    let selection = Select::new()
        .with_prompt("Where to store the password?")
        .items(choices)
        .default(0)
        .interact()
        .map_err(prompt_err)?;

    if selection == 0 {
        ambientika_config::store_password(profile_name, password)?;
        eprintln!("   ✓ Password stored in system keyring");
        Ok(None)
    } else {
        Ok(Some(password.to_owned()))
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Init => init(),

        ConfigCommand::Show => {
            let cfg = redacted(&config::load_config_or_default());
            let out = output::render_single(&global.output, &cfg, format_config, |_| {
                "config".into()
            });
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::Path => {
            output::print_output(&config::config_path().display().to_string(), false);
            Ok(())
        }

        ConfigCommand::Profiles => {
            let cfg = config::load_config_or_default();
            if cfg.profiles.is_empty() {
                eprintln!("No profiles configured. Run: ambientika config init");
                return Ok(());
            }
            let default = cfg.profile_name(None);
            let mut names: Vec<_> = cfg.profiles.keys().collect();
            names.sort();
            for name in names {
                let marker = if *name == default { " *" } else { "" };
                println!("{name}{marker}");
            }
            Ok(())
        }

        ConfigCommand::Use { name } => {
            let mut cfg = config::load_config_or_default();
            if !cfg.profiles.contains_key(&name) {
                return Err(CliError::ProfileNotFound {
                    available: available_profiles(&cfg),
                    name,
                });
            }
            cfg.default_profile = Some(name.clone());
            config::save_config(&cfg)?;
            eprintln!("✓ Default profile set to '{name}'");
            Ok(())
        }

        ConfigCommand::SetPassword => {
            let cfg = config::load_config_or_default();
            let profile_name = config::active_profile_name(global, &cfg);
            if !cfg.profiles.contains_key(&profile_name) {
                return Err(CliError::ProfileNotFound {
                    available: available_profiles(&cfg),
                    name: profile_name,
                });
            }
            let password = prompt_password()?;
            ambientika_config::store_password(&profile_name, &password)?;
            eprintln!("✓ Password stored in system keyring for profile '{profile_name}'");
            Ok(())
        }
    }
}

/// Interactive wizard. Adds or replaces one profile and keeps the rest.
fn init() -> Result<(), CliError> {
    let config_path = config::config_path();
    eprintln!("Ambientika zone sync: configuration wizard");
    eprintln!("   Config path: {}\n", config_path.display());

    let profile_name: String = Input::new()
        .with_prompt("Profile name")
        .default("default".into())
        .interact_text()
        .map_err(prompt_err)?;

    let api_url: String = Input::new()
        .with_prompt("Service URL")
        .default(ambientika_api::DEFAULT_BASE_URL.into())
        .interact_text()
        .map_err(prompt_err)?;

    let username: String = Input::new()
        .with_prompt("Username (account e-mail)")
        .interact_text()
        .map_err(prompt_err)?;
    if username.is_empty() {
        return Err(CliError::Validation {
            field: "username".into(),
            reason: "username cannot be empty".into(),
        });
    }
    let password = prompt_password()?;
    let password = prompt_password_storage(&profile_name, &password)?;

    let house_id: i64 = Input::new()
        .with_prompt("House id (see: ambientika houses)")
        .interact_text()
        .map_err(prompt_err)?;

    let profile = Profile {
        api_url: (api_url != ambientika_api::DEFAULT_BASE_URL).then_some(api_url),
        house_id: Some(house_id),
        username: Some(username),
        password,
        ..Profile::default()
    };

    let mut cfg = config::load_config_or_default();
    cfg.profiles.insert(profile_name.clone(), profile);
    if cfg.default_profile.is_none() || cfg.profiles.len() == 1 {
        cfg.default_profile = Some(profile_name.clone());
    }
    let written = config::save_config(&cfg)?;

    eprintln!("\n✓ Configuration written to {}", written.display());
    eprintln!("  Profile: {profile_name}");
    eprintln!("\n  Try it: ambientika sync");
    Ok(())
}
