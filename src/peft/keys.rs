//! Checkpoint key layout
//!
//! Every serialized adapter tensor is stored under
//! `<wrapper_prefix>_<layer path with '.' replaced by '_'>.<field>`.

pub const LORA_DOWN: &str = "lora_down.weight";
pub const LORA_UP: &str = "lora_up.weight";
pub const ALPHA: &str = "alpha";
pub const DORA_SCALE: &str = "dora_scale";
pub const HADA_W1_A: &str = "hada_w1_a";
pub const HADA_W1_B: &str = "hada_w1_b";
pub const HADA_W2_A: &str = "hada_w2_a";
pub const HADA_W2_B: &str = "hada_w2_b";

/// Every field an adapter may serialize.
pub const KNOWN_FIELDS: [&str; 8] =
    [LORA_DOWN, LORA_UP, ALPHA, DORA_SCALE, HADA_W1_A, HADA_W1_B, HADA_W2_A, HADA_W2_B];

/// Layer path with separators normalized to underscores.
pub fn clean_layer_name(layer_name: &str) -> String {
    layer_name.replace('.', "_")
}

/// Dot-terminated adapter prefix for `layer_name` under `wrapper_prefix`.
pub fn adapter_prefix(wrapper_prefix: &str, layer_name: &str) -> String {
    let cleaned = clean_layer_name(layer_name);
    if wrapper_prefix.is_empty() {
        format!("{cleaned}.")
    } else {
        format!("{wrapper_prefix}_{cleaned}.")
    }
}

/// Split a full key into its dot-terminated adapter prefix and known field.
///
/// Returns `None` when the key does not end in a known field or nothing
/// precedes it.
pub fn split_key(key: &str) -> Option<(&str, &'static str)> {
    KNOWN_FIELDS.iter().find_map(|&field| {
        let stem = key.strip_suffix(field)?;
        (stem.len() > 1 && stem.ends_with('.')).then_some((stem, field))
    })
}

/// Name under which a wrapper registers an adapter it only knows by prefix.
pub fn relative_name<'a>(wrapper_prefix: &str, adapter_prefix: &'a str) -> &'a str {
    let trimmed = adapter_prefix.strip_suffix('.').unwrap_or(adapter_prefix);
    if wrapper_prefix.is_empty() {
        return trimmed;
    }
    trimmed
        .strip_prefix(wrapper_prefix)
        .and_then(|rest| rest.strip_prefix('_'))
        .unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_prefix_replaces_dots() {
        assert_eq!(
            adapter_prefix("lora_unet", "down_blocks.0.attentions.1.to_q"),
            "lora_unet_down_blocks_0_attentions_1_to_q."
        );
        assert_eq!(adapter_prefix("", "a.0"), "a_0.");
    }

    #[test]
    fn test_split_key_known_fields() {
        assert_eq!(split_key("lora_unet_a_0.lora_down.weight"), Some(("lora_unet_a_0.", LORA_DOWN)));
        assert_eq!(split_key("lora_unet_a_0.alpha"), Some(("lora_unet_a_0.", ALPHA)));
        assert_eq!(split_key("lora_unet_a_0.hada_w2_b"), Some(("lora_unet_a_0.", HADA_W2_B)));
        assert_eq!(split_key("lora_unet_a_0.dora_scale"), Some(("lora_unet_a_0.", DORA_SCALE)));
    }

    #[test]
    fn test_split_key_rejects_unknown() {
        assert_eq!(split_key("lora_unet_a_0.weight"), None);
        assert_eq!(split_key("lora_unet_a_0alpha"), None);
        assert_eq!(split_key(".alpha"), None);
        assert_eq!(split_key("alpha"), None);
    }

    #[test]
    fn test_relative_name_strips_wrapper_prefix() {
        assert_eq!(relative_name("lora_unet", "lora_unet_mid_block_0."), "mid_block_0");
        assert_eq!(relative_name("lora_te", "lora_unet_mid_block_0."), "lora_unet_mid_block_0");
        assert_eq!(relative_name("", "x_1."), "x_1");
    }
}
