//! Macros for string-backed enums.
//!
//! Most enums in the crate are persisted as lowercase strings (YAML config,
//! SQLite columns, NDJSON lines, CSV export), so they all need the same
//! `as_str` / `Display` / `FromStr` trio kept in agreement.

/// Generate `as_str`, `ALL`, `Display` and `FromStr` for a fieldless enum.
///
/// Parsing is case-insensitive. Extra accepted spellings can be listed after
/// the canonical string with `|`.
///
/// ```rust,ignore
/// enum_display_fromstr!(
///     Platform,
///     BridgeError::invalid_platform,
///     {
///         Board => "board" | "asana",
///         Tracker => "tracker",
///     }
/// );
/// ```
#[macro_export]
macro_rules! enum_display_fromstr {
    (
        $enum_name:ident,
        $error_ctor:path,
        { $($variant:ident => $str:literal $(| $alias:literal)*),+ $(,)? }
    ) => {
        impl $enum_name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$enum_name] = &[$($enum_name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($enum_name::$variant => $str,)+
                }
            }
        }

        impl std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $enum_name {
            type Err = $crate::error::BridgeError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s.trim().to_lowercase().as_str() {
                    $($str $(| $alias)* => Ok($enum_name::$variant),)+
                    _ => Err($error_ctor(s.to_string())),
                }
            }
        }
    };
}

/// Generate only a `Display` implementation for enums that are never parsed.
#[macro_export]
macro_rules! enum_display {
    (
        $enum_name:ident,
        { $($variant:ident => $str:expr),+ $(,)? }
    ) => {
        impl std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $($enum_name::$variant => f.write_str($str),)+
                }
            }
        }
    };
}

#[cfg(test)]
mod test {
    use crate::error::BridgeError;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Color {
        Red,
        Green,
    }

    enum_display_fromstr!(Color, BridgeError::Other, {
        Red => "red" | "r",
        Green => "green",
    });

    #[derive(Debug)]
    enum Shade {
        Light,
        Dark,
    }

    enum_display!(Shade, { Light => "light", Dark => "dark" });

    #[test]
    fn test_roundtrip_and_aliases() {
        assert_eq!(Color::Red.to_string(), "red");
        assert_eq!("GREEN".parse::<Color>().unwrap(), Color::Green);
        assert_eq!(" r ".parse::<Color>().unwrap(), Color::Red);
        assert!("blue".parse::<Color>().is_err());
        assert_eq!(Color::ALL, &[Color::Red, Color::Green]);
    }

    #[test]
    fn test_display_only() {
        assert_eq!(Shade::Light.to_string(), "light");
        assert_eq!(Shade::Dark.to_string(), "dark");
    }
}
