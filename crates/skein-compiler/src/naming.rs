//! Human-readable names derived from DAG signatures.

use std::collections::HashSet;
use std::sync::OnceLock;

/// Memorable words for naming deployed workflows, grouped by theme. A few
/// words sit in more than one theme; the lookup list is deduplicated.
const WORDS: &[&str] = &[
    // Constellations & stars
    "andromeda", "orion", "cassiopeia", "lyra", "vega", "sirius", "polaris",
    "altair", "rigel", "deneb", "antares", "arcturus", "betelgeuse", "capella",
    "canopus", "procyon", "aldebaran", "spica", "regulus", "fomalhaut",
    "achernar", "bellatrix", "mintaka", "alnilam", "alnitak", "mizar",
    "alcor", "dubhe", "merak", "alioth",
    // Trees & plants
    "sequoia", "baobab", "cypress", "juniper", "cedar", "maple", "willow",
    "birch", "aspen", "magnolia", "acacia", "banyan", "redwood", "hemlock",
    "linden", "sycamore", "alder", "hazel", "laurel", "myrtle", "oleander",
    "wisteria", "jasmine", "orchid", "dahlia", "peony", "lotus", "iris",
    "azalea", "camellia",
    // Minerals & gems
    "obsidian", "quartz", "onyx", "jade", "topaz", "opal", "garnet",
    "zircon", "beryl", "pyrite", "agate", "jasper", "basalt", "granite",
    "marble", "slate", "feldspar", "mica", "cobalt", "titanium", "chromium",
    "rhodium", "iridium", "osmium", "bismuth", "galena", "calcite",
    "dolomite", "gypsum", "flint",
    // Mythical places
    "avalon", "olympus", "elysium", "arcadia", "valhalla", "asgard",
    "atlantis", "eldorado", "utopia", "shangri-la", "camelot", "hyperion",
    "lemuria", "midgard", "nirvana", "zion", "eden", "thule", "lyonesse",
    "ithaca", "colchis", "delphi", "knossos", "mycenae", "thebes",
    "carthage", "persepolis", "palmyra", "petra", "angkor",
    // Animals
    "phoenix", "griffin", "falcon", "osprey", "condor", "albatross",
    "peregrine", "kestrel", "merlin", "harrier", "heron", "crane",
    "pelican", "cormorant", "kingfisher", "nightingale", "skylark",
    "wren", "swift", "raven", "panther", "jaguar", "leopard", "lynx",
    "ocelot", "cheetah", "gazelle", "impala", "oryx", "ibex",
    // Ocean & water
    "nautilus", "triton", "nereid", "coral", "tempest", "tsunami",
    "monsoon", "maelstrom", "cascade", "torrent", "fjord", "lagoon",
    "atoll", "reef", "delta", "estuary", "rapids", "geyser", "glacier",
    "iceberg", "tundra", "permafrost", "aurora", "boreal", "solstice",
    "equinox", "zenith", "nadir", "meridian", "horizon",
    // Mountains & geography
    "summit", "pinnacle", "ridge", "plateau", "mesa", "canyon", "ravine",
    "caldera", "crater", "volcano", "fumarole", "obsidian", "basalt",
    "tectonic", "moraine", "cirque", "escarpment", "butte", "bluff",
    "promontory", "archipelago", "isthmus", "peninsula", "strait",
    "channel", "basin", "watershed", "tributary", "confluence", "headwater",
    // Weather & sky
    "nebula", "pulsar", "quasar", "nova", "cosmos", "stellar", "lunar",
    "solar", "astral", "celestial", "twilight", "dusk", "dawn", "daybreak",
    "nightfall", "starlight", "moonbeam", "sunburst", "rainbow", "prism",
    "spectrum", "halo", "corona", "nimbus", "cirrus", "stratus", "cumulus",
    "zephyr", "mistral", "sirocco",
    // Elements & materials
    "carbon", "silicon", "argon", "neon", "helium", "lithium", "sodium",
    "cesium", "strontium", "barium", "radium", "thorium", "uranium",
    "neptunium", "plutonium", "curium", "fermium", "einsteinium",
    "mendelevium", "nobelium", "lawrencium", "rutherford", "seaborg",
    "bohrium", "hassium", "meitnerium", "darmstadt", "roentgen",
    "copernicium", "flerovium",
    // Colors & light
    "crimson", "scarlet", "vermilion", "amber", "saffron", "ochre",
    "sienna", "umber", "cerulean", "azure", "cobalt", "indigo", "violet",
    "magenta", "cerise", "carmine", "burgundy", "maroon", "teal",
    "turquoise", "emerald", "viridian", "chartreuse", "olive", "khaki",
    "ivory", "pearl", "silver", "platinum", "bronze",
    // Music & sound
    "allegro", "adagio", "andante", "crescendo", "fortissimo", "pianissimo",
    "staccato", "legato", "vibrato", "tremolo", "cadenza", "fugue",
    "sonata", "prelude", "nocturne", "requiem", "serenade", "overture",
    "symphony", "concerto", "aria", "ballad", "etude", "rondo",
    "scherzo", "minuet", "bolero", "tango", "waltz", "mazurka",
    // Ancient & history
    "spartan", "athenian", "roman", "viking", "samurai", "centurion",
    "gladiator", "pharaoh", "sultan", "emperor", "monarch", "sentinel",
    "guardian", "herald", "vanguard", "pioneer", "voyager", "navigator",
    "explorer", "pathfinder", "trailblazer", "frontier", "outpost",
    "citadel", "fortress", "bastion", "rampart", "parapet", "battlement",
    "watchtower",
    // Abstract & qualities
    "apex", "vertex", "nexus", "cipher", "axiom", "theorem", "paradox",
    "enigma", "quantum", "vector", "matrix", "tensor", "scalar", "fractal",
    "helix", "spiral", "vortex", "flux", "pulse", "surge", "catalyst",
    "prism", "echo", "resonance", "harmony", "cadence", "rhythm",
    "tempo", "momentum", "velocity",
    // Nature & seasons
    "solstice", "equinox", "blossom", "harvest", "frost", "ember",
    "kindle", "spark", "blaze", "flame", "inferno", "pyre", "beacon",
    "lantern", "lighthouse", "compass", "anchor", "rudder", "helm",
    "keel", "mast", "bowsprit", "starboard", "portside", "leeward",
    "windward", "current", "drift", "voyage", "odyssey",
];

fn unique_words() -> &'static [&'static str] {
    static UNIQUE: OnceLock<Vec<&'static str>> = OnceLock::new();
    UNIQUE.get_or_init(|| {
        let mut seen = HashSet::new();
        WORDS
            .iter()
            .copied()
            .filter(|word| seen.insert(*word))
            .collect()
    })
}

/// Number of distinct words available.
pub fn word_count() -> usize {
    unique_words().len()
}

/// Pick a memorable name for a signature, avoiding names already taken in
/// the same scope.
///
/// The first 8 hex chars of the signature seed an index into the word list,
/// so the pick is deterministic until a collision forces a forward walk.
/// With every word taken, the seeded word gets a numeric suffix.
pub fn pick_signature_name(signature: &str, used_names: &HashSet<String>) -> String {
    let words = unique_words();
    let total = words.len();
    let seed = signature
        .get(..8)
        .and_then(|prefix| u32::from_str_radix(prefix, 16).ok())
        .unwrap_or(0) as usize;

    for offset in 0..total {
        let word = words[(seed + offset) % total];
        if !used_names.contains(word) {
            return word.to_string();
        }
    }

    let base = words[seed % total];
    let mut suffix = 2u32;
    loop {
        let candidate = format!("{base}-{suffix}");
        if !used_names.contains(&candidate) {
            return candidate;
        }
        suffix += 1;
    }
}

fn slug_with(name: &str, separator: char) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_sep = false;
    for ch in name.chars() {
        let lower = ch.to_ascii_lowercase();
        if lower.is_ascii_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push(separator);
            }
            pending_sep = false;
            slug.push(lower);
        } else {
            pending_sep = true;
        }
    }
    slug
}

/// Lowercase a workflow name into an engine path segment. Runs of anything
/// outside `[a-z0-9]` collapse to a single underscore; no leading or
/// trailing separators.
pub fn slugify(name: &str) -> String {
    slug_with(name, '_')
}

/// Dashed display form of a style name: `"My Brand"` becomes `my-brand`.
pub fn style_slug(name: &str) -> String {
    slug_with(name, '-')
}

/// Versioned signature name for a styled workflow: `<slug>-v<n>` with the
/// smallest `n >= 1` not yet taken in the scope.
pub fn styled_signature_name(style_name: &str, used_names: &HashSet<String>) -> String {
    let slug = style_slug(style_name);
    let mut version = 1u32;
    loop {
        let candidate = format!("{slug}-v{version}");
        if !used_names.contains(&candidate) {
            return candidate;
        }
        version += 1;
    }
}

/// Engine path for a deployed workflow, scoped per application.
pub fn flow_path(scope: &str, name: &str) -> String {
    format!("f/workflows/{}/{}", scope, slugify(name))
}
