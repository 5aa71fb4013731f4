/// Define a configuration struct with embedded defaults
///
/// Each field is declared once as `name: Type = default`. The macro emits the
/// struct with public fields, a `Default` impl from the declared values,
/// serde support with `#[serde(default)]` so partial TOML files fall back
/// field by field, and a `FIELDS` list used to flag unknown keys.
///
/// ```
/// smartcache::config_struct! {
///     pub struct QueueConfig {
///         delay_ms: u64 = 1_000,
///         enabled: bool = true,
///     }
/// }
///
/// assert_eq!(QueueConfig::FIELDS, &["delay_ms", "enabled"]);
/// assert_eq!(QueueConfig::default().delay_ms, 1_000);
/// ```
#[macro_export]
macro_rules! config_struct {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$field_meta:meta])*
                $field:ident: $ty:ty = $default:expr
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
        #[serde(default)]
        $vis struct $name {
            $( $(#[$field_meta])* pub $field: $ty, )*
        }

        impl $name {
            /// Field names as they appear in the TOML file
            pub const FIELDS: &'static [&'static str] = &[$(stringify!($field)),*];
        }

        impl Default for $name {
            fn default() -> Self {
                Self { $( $field: $default, )* }
            }
        }
    };
}
