//! Macro for implementing Display and FromStr for wire-name enums
//!
//! Methods, error kinds and response sources all travel as short strings in
//! persisted records, configuration files and log fields. This macro keeps
//! the mapping in one place.
//!
//! # Example
//!
//! ```rust
//! use resilink_domain::impl_domain_enum_conversions;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//! pub enum Phase {
//!     Connect,
//!     Receive,
//! }
//!
//! impl_domain_enum_conversions!(Phase {
//!     Connect => "connect",
//!     Receive => "receive",
//! });
//!
//! assert_eq!(Phase::Connect.to_string(), "connect");
//! assert_eq!("RECEIVE".parse::<Phase>().unwrap(), Phase::Receive);
//! ```

/// Implements Display and FromStr for enums with a fixed wire name
///
/// - Display writes the wire name verbatim
/// - FromStr matches the wire name case-insensitively
#[macro_export]
macro_rules! impl_domain_enum_conversions {
    ($enum_name:ident { $($variant:ident => $str:expr),+ $(,)? }) => {
        impl $enum_name {
            /// Wire name of this variant
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $str,)+
                }
            }
        }

        impl std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $enum_name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $(
                    if s.eq_ignore_ascii_case($str) {
                        return Ok(Self::$variant);
                    }
                )+
                Err(format!("Invalid {}: {}", stringify!($enum_name), s))
            }
        }
    };
}
