//! Well-known method slots ("lfuns") every program can define.

/// Slot names in table order. The position is the slot number stored in a
/// program's `lfuns` table.
pub const LFUN_NAMES: [&str; NUM_LFUNS] = [
    "__INIT",
    "create",
    "destroy",
    "`+",
    "`-",
    "`&",
    "`|",
    "`^",
    "`<<",
    "`>>",
    "`*",
    "`/",
    "`%",
    "`~",
    "`==",
    "`<",
    "`>",
    "__hash",
    "cast",
    "`!",
    "`[]",
    "`[]=",
    "`->",
    "`->=",
    "_sizeof",
    "_indices",
    "_values",
    "`()",
    "``+",
    "``-",
    "``&",
    "``|",
    "``^",
    "``<<",
    "``>>",
    "``*",
    "``/",
    "``%",
    "`+=",
    "_is_type",
    "_sprintf",
    "_equal",
    "_m_delete",
    "_get_iterator",
];

pub const NUM_LFUNS: usize = 44;

pub const LFUN_INIT: usize = 0;
pub const LFUN_CREATE: usize = 1;

/// Slot number for a method name.
pub fn lfun_index(name: &str) -> Option<usize> {
    LFUN_NAMES.iter().position(|n| *n == name)
}
