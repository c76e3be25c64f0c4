//! Human-readable session ids, `<word>-<word>`, generalized from
//! the teacher's `generate_agent_id` (which paired two 4-hex-char halves of a
//! UUID) to two dictionary words joined by a hyphen.

use rand::seq::SliceRandom;

const ADJECTIVES: &[&str] = &[
    "able", "agile", "amber", "ancient", "arid", "autumn", "avid", "azure", "bold", "brave",
    "bright", "broad", "busy", "calm", "clever", "cosmic", "crisp", "curious", "dapper", "dark",
    "deep", "dusty", "eager", "early", "electric", "epic", "fair", "famous", "fancy", "fast",
    "fiery", "fine", "flying", "fresh", "fuzzy", "gentle", "giant", "golden", "grand", "gray",
    "green", "happy", "hardy", "hidden", "honest", "humble", "icy", "jolly", "keen", "kind",
    "lazy", "lively", "lonely", "loud", "loyal", "lucky", "lush", "mellow", "merry", "mighty",
    "misty", "modest", "mute", "neat", "noble", "odd", "olive", "orange", "patient", "plain",
    "polite", "proud", "quick", "quiet", "rapid", "rare", "rich", "rosy", "royal", "rusty",
    "sandy", "shiny", "silent", "silver", "sleepy", "sly", "small", "smart", "soft", "solid",
    "spare", "steady", "stormy", "stout", "strong", "sunny", "sweet", "swift", "tame", "tidy",
    "tiny", "tough", "trim", "true", "vast", "vivid", "warm", "wild", "wise", "witty",
    "young", "zesty",
];

const NOUNS: &[&str] = &[
    "anchor", "arrow", "badger", "basil", "beacon", "bear", "beaver", "birch", "boar", "bolt",
    "bramble", "breeze", "brook", "canyon", "cedar", "cliff", "cloud", "comet", "condor", "coral",
    "cove", "crane", "creek", "cricket", "crow", "delta", "dove", "drake", "eagle", "ember",
    "falcon", "fern", "finch", "fjord", "fox", "gecko", "glacier", "goat", "grove", "gull",
    "harbor", "hawk", "heron", "hill", "ibis", "island", "ivy", "jasper", "kestrel", "koi",
    "lagoon", "lark", "leopard", "lichen", "lily", "lizard", "llama", "lotus", "lynx", "maple",
    "marsh", "meadow", "meteor", "mink", "mist", "moss", "moth", "narwhal", "nectar", "newt",
    "oak", "ocelot", "orchid", "osprey", "otter", "owl", "panther", "pebble", "petrel", "pine",
    "plover", "poppy", "prairie", "quail", "raven", "reef", "ridge", "river", "robin", "sable",
    "sage", "salmon", "sequoia", "shrew", "skylark", "sparrow", "sprout", "spruce", "stream",
    "swan", "tern", "thrush", "tiger", "tundra", "valley", "viper", "walrus", "warbler", "willow",
    "wren", "yucca", "zebra",
];

/// Draws a random `<adjective>-<noun>` pair. Not guaranteed unique on its
/// own; callers retry against the registry until a free id is found.
pub fn generate_session_id() -> String {
    let mut rng = rand::thread_rng();
    let adjective = ADJECTIVES.choose(&mut rng).expect("ADJECTIVES is non-empty");
    let noun = NOUNS.choose(&mut rng).expect("NOUNS is non-empty");
    format!("{adjective}-{noun}")
}

/// Validates the `^[a-z]+-[a-z]+$` shape required for a session
/// id, whether it came off the wire or out of a `Host` header.
pub fn is_valid_session_id(id: &str) -> bool {
    let Some((left, right)) = id.split_once('-') else {
        return false;
    };
    if left.is_empty() || right.is_empty() || right.contains('-') {
        return false;
    }
    left.bytes().all(|b| b.is_ascii_lowercase()) && right.bytes().all(|b| b.is_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_match_the_session_id_shape() {
        for _ in 0..200 {
            let id = generate_session_id();
            assert!(is_valid_session_id(&id), "{id} did not match shape");
        }
    }

    #[test]
    fn rejects_malformed_shapes() {
        assert!(!is_valid_session_id("fakesessionid"));
        assert!(!is_valid_session_id("Brave-Otter"));
        assert!(!is_valid_session_id("one-two-three"));
        assert!(!is_valid_session_id("-noun"));
        assert!(!is_valid_session_id("adj-"));
        assert!(!is_valid_session_id("has_underscore-noun"));
    }

    #[test]
    fn accepts_well_formed_ids() {
        assert!(is_valid_session_id("brave-otter"));
        assert!(is_valid_session_id("a-b"));
    }
}
