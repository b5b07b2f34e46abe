//! Reserved namespace ids and hashing constants.
//!
//! Namespace ids below are fixed by convention: models trained with one build
//! must address the same namespaces in another, so none of these may change.

/// A namespace id. User namespaces are usually the first byte of their name.
pub type NamespaceIndex = u8;

/// Hashed identifier of a single feature.
pub type FeatureIndex = u64;

/// Value of a single feature.
pub type FeatureValue = f32;

/// Number of distinct namespace ids.
pub const NUM_NAMESPACES: usize = 256;

pub const QUADRATIC_CONSTANT: u64 = 27942141;
pub const CUBIC_CONSTANT: u64 = 21791;
pub const CUBIC_CONSTANT2: u64 = 37663;
pub const AFFIX_CONSTANT: u64 = 13903957;

/// Index of the constant (bias) feature.
pub const CONSTANT: FeatureIndex = 0;

pub const DEFAULT_NAMESPACE_STR: &str = " ";
pub const WILDCARD_NAMESPACE_STR: &str = ":";

pub const DEFAULT_NAMESPACE: NamespaceIndex = 32; // ' '
pub const WILDCARD_NAMESPACE: NamespaceIndex = 58; // ':'
pub const WAP_LDF_NAMESPACE: NamespaceIndex = 126;
pub const HISTORY_NAMESPACE: NamespaceIndex = 127;
pub const CONSTANT_NAMESPACE: NamespaceIndex = 128;
pub const NN_OUTPUT_NAMESPACE: NamespaceIndex = 129;
pub const AUTOLINK_NAMESPACE: NamespaceIndex = 130;
pub const NEIGHBOR_NAMESPACE: NamespaceIndex = 131; // \x83
pub const AFFIX_NAMESPACE: NamespaceIndex = 132; // \x84
pub const SPELLING_NAMESPACE: NamespaceIndex = 133; // \x85
pub const CONDITIONING_NAMESPACE: NamespaceIndex = 134; // \x86
pub const DICTIONARY_NAMESPACE: NamespaceIndex = 135; // \x87
pub const NODE_ID_NAMESPACE: NamespaceIndex = 136; // \x88
pub const BASELINE_ENABLED_MESSAGE_NAMESPACE: NamespaceIndex = 137; // \x89
pub const CCB_SLOT_NAMESPACE: NamespaceIndex = 139;
pub const CCB_ID_NAMESPACE: NamespaceIndex = 140;
pub const IGL_FEEDBACK_NAMESPACE: NamespaceIndex = 141;

pub const SPECIAL_NAMESPACES: [NamespaceIndex; 17] = [
    DEFAULT_NAMESPACE,
    WILDCARD_NAMESPACE,
    WAP_LDF_NAMESPACE,
    HISTORY_NAMESPACE,
    CONSTANT_NAMESPACE,
    NN_OUTPUT_NAMESPACE,
    AUTOLINK_NAMESPACE,
    NEIGHBOR_NAMESPACE,
    AFFIX_NAMESPACE,
    SPELLING_NAMESPACE,
    CONDITIONING_NAMESPACE,
    DICTIONARY_NAMESPACE,
    NODE_ID_NAMESPACE,
    BASELINE_ENABLED_MESSAGE_NAMESPACE,
    CCB_SLOT_NAMESPACE,
    CCB_ID_NAMESPACE,
    IGL_FEEDBACK_NAMESPACE,
];

/// Canonical audit name for a reserved namespace, `None` for user namespaces.
pub fn reserved_namespace_name(ns: NamespaceIndex) -> Option<&'static str> {
    match ns {
        DEFAULT_NAMESPACE => Some(DEFAULT_NAMESPACE_STR),
        WILDCARD_NAMESPACE => Some(WILDCARD_NAMESPACE_STR),
        NEIGHBOR_NAMESPACE => Some("neighbor"),
        AFFIX_NAMESPACE => Some("affix"),
        SPELLING_NAMESPACE => Some("spelling"),
        CONDITIONING_NAMESPACE => Some("search_condition"),
        DICTIONARY_NAMESPACE => Some("dictionary"),
        CCB_ID_NAMESPACE => Some("_ccb_slot_index"),
        WAP_LDF_NAMESPACE
        | HISTORY_NAMESPACE
        | CONSTANT_NAMESPACE
        | NN_OUTPUT_NAMESPACE
        | AUTOLINK_NAMESPACE
        | NODE_ID_NAMESPACE
        | BASELINE_ENABLED_MESSAGE_NAMESPACE
        | CCB_SLOT_NAMESPACE
        | IGL_FEEDBACK_NAMESPACE => Some(""),
        _ => None,
    }
}
