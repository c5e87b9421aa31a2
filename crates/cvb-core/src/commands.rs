//! `!c` chat command: grammar and interpretation against per-user state.
//!
//! Dispatch on the first argument, in order:
//! - a plain number converts from the active to the home currency (or `args[1]`)
//! - `$<number>` converts from USD to the active currency (or `args[1]`)
//! - `active <CODE>` / `home <CODE>` store a preference
//! - anything else is read as `<number><CODE>` and converts to the active
//!   currency (or `args[1]`)

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::{
    conversion::ConversionEngine,
    currency::CurrencyCode,
    domain::{Credential, CurrencySlot, UserId},
    ports::CredentialStore,
    registry::UserRegistry,
};

pub const COMMAND_PREFIX: &str = "!c ";
pub const NOT_REGISTERED_REPLY: &str = "Broadcaster not registered, need to renew.";
pub const USAGE_REPLY: &str =
    "Usage: !c <amount> [CODE] | !c $<amount> [CODE] | !c <amount><CODE> [CODE] | !c active <CODE> | !c home <CODE>";

/// Currency operand before per-user defaults are applied.
#[derive(Clone, Debug, PartialEq)]
pub enum CurrencyRef {
    Active,
    Home,
    Code(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Convert {
        amount: f64,
        from: CurrencyRef,
        to: CurrencyRef,
    },
    SetCurrency {
        slot: CurrencySlot,
        code: Option<String>,
    },
    InvalidAmount(String),
    Usage,
}

/// Parse chat text. `None` when the text is not a `!c` command.
pub fn parse_command(text: &str) -> Option<Command> {
    let rest = text.strip_prefix(COMMAND_PREFIX)?;
    let args: Vec<&str> = rest.split_whitespace().collect();

    let Some(&first) = args.first() else {
        return Some(Command::Usage);
    };
    let target = args.get(1).map(|s| CurrencyRef::Code(s.to_string()));

    if let Some(amount) = parse_amount(first) {
        return Some(Command::Convert {
            amount,
            from: CurrencyRef::Active,
            to: target.unwrap_or(CurrencyRef::Home),
        });
    }

    if let Some(amount) = first.strip_prefix('$').and_then(parse_amount) {
        return Some(Command::Convert {
            amount,
            from: CurrencyRef::Code("USD".to_string()),
            to: target.unwrap_or(CurrencyRef::Active),
        });
    }

    let slot = match first {
        "active" => Some(CurrencySlot::Active),
        "home" => Some(CurrencySlot::Home),
        _ => None,
    };
    if let Some(slot) = slot {
        return Some(Command::SetCurrency {
            slot,
            code: args.get(1).map(|s| s.to_string()),
        });
    }

    // `<number><CODE>` with the code being the last three characters.
    let Some((split, _)) = first.char_indices().rev().nth(2) else {
        return Some(Command::InvalidAmount(first.to_string()));
    };
    let (number, code) = first.split_at(split);
    match parse_amount(number) {
        Some(amount) => Some(Command::Convert {
            amount,
            from: CurrencyRef::Code(code.to_string()),
            to: target.unwrap_or(CurrencyRef::Active),
        }),
        None => Some(Command::InvalidAmount(first.to_string())),
    }
}

/// Whole-token signed decimal; rejects NaN and infinities.
fn parse_amount(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn resolve(currency: &CurrencyRef, prefs: &Credential) -> String {
    match currency {
        CurrencyRef::Active => prefs.active_currency.to_string(),
        CurrencyRef::Home => prefs.home_currency.to_string(),
        CurrencyRef::Code(code) => code.clone(),
    }
}

pub struct CommandInterpreter {
    registry: Arc<UserRegistry>,
    store: Arc<dyn CredentialStore>,
    engine: ConversionEngine,
}

impl CommandInterpreter {
    pub fn new(
        registry: Arc<UserRegistry>,
        store: Arc<dyn CredentialStore>,
        engine: ConversionEngine,
    ) -> Self {
        Self {
            registry,
            store,
            engine,
        }
    }

    /// Reply text for a chat message, or `None` when nothing should be sent.
    pub async fn interpret(&self, user_id: &UserId, raw_text: &str) -> Option<String> {
        let command = parse_command(raw_text)?;
        debug!(%user_id, ?command, "processing command");

        let Some(prefs) = self.registry.snapshot(user_id).await else {
            info!(%user_id, "command from unregistered broadcaster");
            return Some(NOT_REGISTERED_REPLY.to_string());
        };

        match command {
            Command::Usage => Some(USAGE_REPLY.to_string()),
            Command::InvalidAmount(raw) => Some(format!("Invalid amount {raw}")),
            Command::SetCurrency { slot, code } => {
                Some(self.set_currency(user_id, slot, code.as_deref()).await)
            }
            Command::Convert { amount, from, to } => {
                let from = resolve(&from, &prefs);
                let to = resolve(&to, &prefs);
                match self.engine.convert(amount, &from, &to).await {
                    Ok(reply) => Some(reply),
                    Err(e) => {
                        warn!(%user_id, %from, %to, error = %e, "conversion failed");
                        None
                    }
                }
            }
        }
    }

    async fn set_currency(&self, user_id: &UserId, slot: CurrencySlot, raw: Option<&str>) -> String {
        let keyword = match slot {
            CurrencySlot::Active => "active",
            CurrencySlot::Home => "home",
        };
        let Some(raw) = raw else {
            return format!("Usage: !c {keyword} <CODE>");
        };
        let Some(code) = CurrencyCode::parse(raw) else {
            return format!("Unknown currency {}", raw.to_uppercase());
        };

        let Some(mut credential) = self.registry.lock(user_id).await else {
            return NOT_REGISTERED_REPLY.to_string();
        };
        credential.set_currency(slot, code.clone());
        if let Err(e) = self.store.update_currency(user_id, slot, &code).await {
            error!(%user_id, error = %e, "currency preference not persisted");
        }
        drop(credential);

        info!(%user_id, slot = keyword, %code, "currency preference updated");
        format!("{} currency set to {code}", slot.label())
    }
}
