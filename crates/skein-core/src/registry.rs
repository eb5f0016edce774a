use std::collections::HashMap;

/// How a node type executes: as a script the engine loads from a path, or as
/// a control construct the compiler translates itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEntry {
    Executable(String),
    Native,
}

/// Registry of node types known to the compiler and validator.
pub struct NodeRegistry {
    entries: HashMap<String, RegistryEntry>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Create a registry with all built-in node types registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        for (name, path) in [
            ("http.call", "f/nodes/http_call"),
            ("lead-service", "f/nodes/lead_service"),
            ("content-generation", "f/nodes/content_generation"),
            ("outbound-sending", "f/nodes/outbound_sending"),
            ("brand-intel", "f/nodes/brand_intel"),
            ("content-sentiment", "f/nodes/content_sentiment"),
            ("lifecycle-emails", "f/nodes/lifecycle_emails"),
            ("client-service", "f/nodes/client_service"),
            ("twilio-sms", "f/nodes/twilio_sms"),
            ("order-service", "f/nodes/order_service"),
            ("product-service", "f/nodes/product_service"),
            ("stripe-service", "f/nodes/stripe_service"),
            ("linkedin-dm", "f/nodes/linkedin_dm"),
            ("linkedin-connect", "f/nodes/linkedin_connect"),
            ("linkedin-post", "f/nodes/linkedin_post"),
            ("google-ads", "f/nodes/google_ads"),
            ("meta-ads", "f/nodes/meta_ads"),
        ] {
            registry.register_executable(name, path);
        }

        // Flow-control constructs have no script behind them.
        for name in ["wait", "condition", "for-each"] {
            registry.register(name, RegistryEntry::Native);
        }

        registry
    }

    /// Register a node type.
    pub fn register(&mut self, name: impl Into<String>, entry: RegistryEntry) {
        self.entries.insert(name.into(), entry);
    }

    pub fn register_executable(&mut self, name: impl Into<String>, path: impl Into<String>) {
        self.register(name, RegistryEntry::Executable(path.into()));
    }

    /// Merge extra executable mappings, e.g. from configuration.
    pub fn extend(&mut self, extra: &HashMap<String, String>) {
        for (name, path) in extra {
            self.register_executable(name.clone(), path.clone());
        }
    }

    pub fn get(&self, name: &str) -> Option<&RegistryEntry> {
        self.entries.get(name)
    }

    /// Script path for an executable node type, if it has one.
    pub fn script_path(&self, name: &str) -> Option<&str> {
        match self.entries.get(name) {
            Some(RegistryEntry::Executable(path)) => Some(path.as_str()),
            _ => None,
        }
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn is_native(&self, name: &str) -> bool {
        matches!(self.entries.get(name), Some(RegistryEntry::Native))
    }

    /// All registered type names, sorted for stable display.
    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(|s| s.as_str()).collect();
        names.sort();
        names
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
