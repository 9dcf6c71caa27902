//! Email subjects sent to guardians through the relay.

use crate::chain::Address;
use crate::config::ConfigError;

const ETH_ADDR_PLACEHOLDER: &str = "{ethAddr}";

/// Build the acceptance subject from the module's command template.
///
/// The template words are joined with single spaces and every `{ethAddr}` placeholder is
/// replaced with the wallet address.
pub fn acceptance_subject(templates: &[Vec<String>], template_idx: u32, wallet: &Address) -> Result<String, ConfigError> {
    let template = templates.get(template_idx as usize).ok_or_else(|| {
        ConfigError::Invalid(format!(
            "acceptance template {} not found ({} available)",
            template_idx,
            templates.len()
        ))
    })?;
    Ok(template
        .join(" ")
        .replace(ETH_ADDR_PLACEHOLDER, &wallet.to_string()))
}

pub fn recovery_subject(wallet: &Address, old_owner: &Address, new_owner: &Address) -> String {
    format!(
        "Recover account {} from old owner {} to new owner {}",
        wallet, old_owner, new_owner
    )
}

/// Parse a subject produced by [`recovery_subject`] back into `(wallet, old, new)`.
pub fn parse_recovery_subject(subject: &str) -> Option<(Address, Address, Address)> {
    let rest = subject.strip_prefix("Recover account ")?;
    let (wallet, rest) = rest.split_once(" from old owner ")?;
    let (old_owner, new_owner) = rest.split_once(" to new owner ")?;
    Some((
        wallet.parse().ok()?,
        old_owner.parse().ok()?,
        new_owner.parse().ok()?,
    ))
}
