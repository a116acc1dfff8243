//! Ordered access tiers checked by the CRUD cycle.

use std::fmt;

/// Entitlement tiers, ordered `None < Basic < Premium < Vip`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum EntitlementLevel {
    #[default]
    None,
    Basic,
    Premium,
    Vip,
}

impl EntitlementLevel {
    /// Variant name as the contract-call tool expects it on the command line.
    pub fn as_arg(self) -> &'static str {
        match self {
            EntitlementLevel::None => "None",
            EntitlementLevel::Basic => "Basic",
            EntitlementLevel::Premium => "Premium",
            EntitlementLevel::Vip => "Vip",
        }
    }

    /// Whether holding `self` satisfies a `required` tier.
    pub fn satisfies(self, required: EntitlementLevel) -> bool {
        self >= required
    }
}

impl fmt::Display for EntitlementLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_arg())
    }
}
