//! Row identifiers shared by the store and the engine.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            pub fn new(id: u64) -> Self {
                Self(id)
            }

            pub fn value(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }
    };
}

row_id!(
    /// Trading account owning credentials, signals and positions.
    AccountId,
    "acct-"
);
row_id!(
    /// Externally created trade signal.
    SignalId,
    "sig-"
);
row_id!(
    /// Local position row.
    PositionId,
    "pos-"
);
row_id!(
    /// Local order row (distinct from the exchange order id).
    OrderId,
    "ord-"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_prefixes() {
        assert_eq!(AccountId(7).to_string(), "acct-7");
        assert_eq!(SignalId(42).to_string(), "sig-42");
    }

    #[test]
    fn test_serde_transparent() {
        let json = serde_json::to_string(&PositionId(3)).unwrap();
        assert_eq!(json, "3");
        let back: OrderId = serde_json::from_str("9").unwrap();
        assert_eq!(back, OrderId(9));
    }
}
