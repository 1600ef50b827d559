//! String-backed enums stored in `TEXT` columns.
//!
//! PostgreSQL columns hold the snake_case name and a `CHECK` constraint pins
//! the allowed values. The `text_enum!` macro generates the enum together with
//! SQLx, serde, ts-rs and string conversions from a single invocation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Returned when a string does not name any variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} {value:?}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Generate a unit enum mapped to a `TEXT` column. Produces:
///
/// - `as_str`, `ALL`, `Display`, `FromStr`
/// - serde as the snake_case string
/// - ts-rs string-union export
/// - SQLx `Type`/`Encode`/`Decode` over `TEXT`
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
        #[ts(export)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    _ => Err(UnknownVariant {
                        kind: stringify!($name),
                        value: s.to_owned(),
                    }),
                }
            }
        }

        impl sqlx::Type<sqlx::Postgres> for $name {
            fn type_info() -> sqlx::postgres::PgTypeInfo {
                <String as sqlx::Type<sqlx::Postgres>>::type_info()
            }

            fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
                <String as sqlx::Type<sqlx::Postgres>>::compatible(ty)
            }
        }

        impl sqlx::Encode<'_, sqlx::Postgres> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut sqlx::postgres::PgArgumentBuffer,
            ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
                <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Postgres> for $name {
            fn decode(
                value: sqlx::postgres::PgValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let raw = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
                Ok(raw.parse::<$name>()?)
            }
        }
    };
}

text_enum! {
    /// Account role. Admins can use the `/api/admin` surface.
    Role {
        Subscriber => "subscriber",
        Admin => "admin",
    }
}

text_enum! {
    /// Product catalog category.
    Category {
        Flower => "flower",
        PreRoll => "pre_roll",
        Edible => "edible",
        Vape => "vape",
        Concentrate => "concentrate",
        Topical => "topical",
        Accessory => "accessory",
    }
}

text_enum! {
    Strain {
        Indica => "indica",
        Sativa => "sativa",
        Hybrid => "hybrid",
        Cbd => "cbd",
    }
}

text_enum! {
    /// Order lifecycle state. See [`OrderStatus::can_transition_to`].
    OrderStatus {
        Pending => "pending",
        Confirmed => "confirmed",
        OutForDelivery => "out_for_delivery",
        Delivered => "delivered",
        Cancelled => "cancelled",
    }
}

text_enum! {
    /// Why a token balance changed.
    TransactionKind {
        Credit => "credit",
        Purchase => "purchase",
        Refund => "refund",
        Adjustment => "adjustment",
    }
}

impl OrderStatus {
    /// Allowed edges: `pending → confirmed → out_for_delivery → delivered`,
    /// plus `pending|confirmed → cancelled`.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Confirmed, OutForDelivery)
                | (OutForDelivery, Delivered)
                | (Pending, Cancelled)
                | (Confirmed, Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_str() {
        for category in Category::ALL {
            assert_eq!(category.as_str().parse::<Category>().unwrap(), *category);
        }
        assert_eq!("out_for_delivery".parse::<OrderStatus>().unwrap(), OrderStatus::OutForDelivery);
    }

    #[test]
    fn unknown_variant_is_rejected() {
        let err = "Admin".parse::<Role>().unwrap_err();
        assert_eq!(err.kind, "Role");
        assert_eq!(err.value, "Admin");
    }

    #[test]
    fn serde_uses_snake_case() {
        assert_eq!(serde_json::to_string(&Category::PreRoll).unwrap(), "\"pre_roll\"");
        let kind: TransactionKind = serde_json::from_str("\"refund\"").unwrap();
        assert_eq!(kind, TransactionKind::Refund);
    }

    #[test]
    fn order_status_forward_path() {
        use OrderStatus::*;
        assert!(Pending.can_transition_to(Confirmed));
        assert!(Confirmed.can_transition_to(OutForDelivery));
        assert!(OutForDelivery.can_transition_to(Delivered));
    }

    #[test]
    fn order_status_rejects_skips_and_reversals() {
        use OrderStatus::*;
        assert!(!Pending.can_transition_to(Delivered));
        assert!(!Delivered.can_transition_to(Pending));
        assert!(!OutForDelivery.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Pending));
    }

    #[test]
    fn order_status_cancel_window() {
        use OrderStatus::*;
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Confirmed.can_transition_to(Cancelled));
        assert!(Delivered.is_terminal());
        assert!(Cancelled.is_terminal());
        assert!(!Confirmed.is_terminal());
    }
}
