//! Item codes shared by the kill feed and the market API: `T<tier>_<NAME>[@<enchant>]`.
//!
//! `T4_MAIN_SWORD` is a tier 4 broadsword, `T6_HEAD_PLATE_SET1@2` a tier 6 helmet
//! at enchantment 2. Quality is not part of the code; both feeds carry it alongside.

use crate::error::ItemCodeError;
use crate::types::Item;

const MIN_CODE_LEN: usize = 4;
const MAX_TIER: u8 = 8;
const MAX_ENCHANTMENT: u8 = 4;

/// Decodes an item code. An empty code is the unequipped slot, not an error.
pub fn decode(code: &str, quality: u8) -> Result<Item, ItemCodeError> {
    if code.is_empty() {
        return Ok(Item::default());
    }
    if code.len() < MIN_CODE_LEN {
        return Err(ItemCodeError::TooShort(code.to_string()));
    }

    let missing_tier = || ItemCodeError::MissingTier(code.to_string());
    let rest = code.strip_prefix('T').ok_or_else(missing_tier)?;
    let tier_byte = *rest.as_bytes().first().ok_or_else(missing_tier)?;
    if !tier_byte.is_ascii_digit() {
        return Err(missing_tier());
    }
    let tier = tier_byte - b'0';
    let body = rest[1..].strip_prefix('_').ok_or_else(missing_tier)?;
    if !(1..=MAX_TIER).contains(&tier) {
        return Err(ItemCodeError::TierOutOfRange { code: code.to_string(), tier });
    }

    let (name, enchantment) = split_enchantment(body).ok_or_else(|| ItemCodeError::BadEnchantment(code.to_string()))?;
    if name.is_empty() {
        return Err(ItemCodeError::EmptyName(code.to_string()));
    }

    Ok(Item {
        name: name.to_string(),
        tier,
        enchantment,
        quality,
    })
}

/// Splits a trailing `@<digit>`. Returns None for any other use of `@`.
fn split_enchantment(body: &str) -> Option<(&str, u8)> {
    let bytes = body.as_bytes();
    let n = bytes.len();
    if n >= 2 && bytes[n - 2] == b'@' {
        let digit = bytes[n - 1];
        if !digit.is_ascii_digit() || digit - b'0' > MAX_ENCHANTMENT {
            return None;
        }
        let name = &body[..n - 2];
        if name.contains('@') {
            return None;
        }
        return Some((name, digit - b'0'));
    }
    if body.contains('@') {
        return None;
    }
    Some((body, 0))
}

/// Exact inverse of [`decode`]. Enchantment 0 is omitted.
pub fn encode(item: &Item) -> String {
    if item.enchantment == 0 {
        format!("T{}_{}", item.tier, item.name)
    } else {
        format!("T{}_{}@{}", item.tier, item.name, item.enchantment)
    }
}
