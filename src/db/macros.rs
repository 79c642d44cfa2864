//! Declarative helpers for building parameter lists and entity descriptions.
//!
//! Both macros expand at compile time to plain constructor calls.

/// Build a `Vec<SqlParam>` from values of mixed types.
///
/// # Example
///
/// ```ignore
/// let params = params![1, "title", true, None::<i64>];
/// ```
#[macro_export]
macro_rules! params {
    () => {
        ::std::vec::Vec::<$crate::db::params::SqlParam>::new()
    };
    ($($value:expr),+ $(,)?) => {
        ::std::vec![$($crate::db::params::SqlParam::from($value)),+]
    };
}

/// Implement [`Entity`](crate::db::schema::Entity) from a field list.
///
/// The table name is the lower-cased type name unless given with `as`.
/// Field names are string literals so they can match camel-cased columns.
///
/// # Example
///
/// ```ignore
/// impl_entity!(Article {
///     "id" => BigInt,
///     "title" => Text,
///     "createdDate" => DateTime,
///     "isBlind" => Bool,
/// });
///
/// impl_entity!(AuditEntry as "audit_log" {
///     "id" => Int,
///     "message" => Text,
/// });
/// ```
#[macro_export]
macro_rules! impl_entity {
    ($ty:ident { $($name:literal => $kind:ident),+ $(,)? }) => {
        $crate::impl_entity!(@impl $ty, stringify!($ty).to_lowercase(), $($name => $kind),+);
    };
    ($ty:ident as $table:literal { $($name:literal => $kind:ident),+ $(,)? }) => {
        $crate::impl_entity!(@impl $ty, ::std::string::String::from($table), $($name => $kind),+);
    };
    (@impl $ty:ident, $table:expr, $($name:literal => $kind:ident),+) => {
        impl $crate::db::schema::Entity for $ty {
            fn table_name() -> ::std::string::String {
                $table
            }

            fn fields() -> &'static [$crate::db::schema::FieldDescriptor] {
                const FIELDS: &[$crate::db::schema::FieldDescriptor] = &[
                    $($crate::db::schema::FieldDescriptor::new(
                        $name,
                        $crate::db::schema::FieldKind::$kind,
                    )),+
                ];
                FIELDS
            }
        }
    };
}
