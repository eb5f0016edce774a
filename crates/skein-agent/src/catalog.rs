//! Static catalog of the downstream services workflows can call.
//!
//! This is the fallback knowledge the model gets when no API registry is
//! configured; agentic generation replaces it with live discovery.

/// One downstream service and the endpoints worth knowing about.
pub struct ServiceInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub key_endpoints: &'static [&'static str],
}

pub const SERVICE_CATALOG: &[ServiceInfo] = &[
    ServiceInfo {
        name: "campaign",
        description: "Campaign lifecycle: gate-check (budget/volume validation), start-run (creates execution run), end-run (finalizes run, auto-retriggers if budget remains)",
        key_endpoints: &[
            "POST /internal/gate-check",
            "POST /internal/start-run",
            "POST /internal/end-run",
        ],
    },
    ServiceInfo {
        name: "lead",
        description: "Lead buffer management: push leads, pull next lead for outreach, search leads",
        key_endpoints: &["POST /buffer/next", "POST /buffer/push", "GET /leads"],
    },
    ServiceInfo {
        name: "brand",
        description: "Brand intelligence: company profiles, sales profiles, tone of voice, value propositions",
        key_endpoints: &["GET /brands/:id", "POST /sales-profile"],
    },
    ServiceInfo {
        name: "content-generation",
        description: "AI-powered content generation: emails, subject lines using stored prompt templates",
        key_endpoints: &["POST /generate", "POST /generate/content"],
    },
    ServiceInfo {
        name: "email-gateway",
        description: "Low-level email sending via configured provider (Postmark, SES)",
        key_endpoints: &["POST /send"],
    },
    ServiceInfo {
        name: "transactional-email",
        description: "Template-based transactional emails by eventType (welcome, confirmation, etc.)",
        key_endpoints: &["POST /send", "GET /stats"],
    },
    ServiceInfo {
        name: "runs",
        description: "Execution tracking: create runs, add costs, mark complete/failed",
        key_endpoints: &["POST /runs/start", "POST /runs/end", "POST /runs/:id/costs"],
    },
    ServiceInfo {
        name: "costs",
        description: "Unit price registry for cost tracking",
        key_endpoints: &["GET /prices"],
    },
    ServiceInfo {
        name: "key",
        description: "API key management: per-app BYOK secrets (Stripe keys, etc.)",
        key_endpoints: &[
            "POST /internal/app-keys",
            "GET /internal/app-keys/:provider/decrypt",
        ],
    },
    ServiceInfo {
        name: "client",
        description: "User/contact management: CRUD users and contacts for an app",
        key_endpoints: &["POST /users", "GET /users", "PUT /users/:id"],
    },
    ServiceInfo {
        name: "stripe",
        description: "Stripe operations: products, prices, checkout sessions, coupons",
        key_endpoints: &["POST /products", "POST /prices", "POST /checkout-sessions"],
    },
    ServiceInfo {
        name: "twilio",
        description: "SMS sending via Twilio",
        key_endpoints: &["POST /send"],
    },
    ServiceInfo {
        name: "instantly",
        description: "Cold email sending via Instantly.ai platform",
        key_endpoints: &["POST /send"],
    },
    ServiceInfo {
        name: "reply-qualification",
        description: "AI classification of email replies: interested, not interested, bounce, etc.",
        key_endpoints: &["POST /qualify"],
    },
    ServiceInfo {
        name: "outlets",
        description: "Media outlet database for PR outreach: find relevant outlets by topic/industry",
        key_endpoints: &["GET /outlets", "GET /outlets/:id"],
    },
    ServiceInfo {
        name: "journalists",
        description: "Journalist database for PR outreach: find and rank journalists by outlet",
        key_endpoints: &["GET /journalists", "GET /journalists/:id"],
    },
    ServiceInfo {
        name: "articles",
        description: "Article database: journalist articles for ranking and context",
        key_endpoints: &["GET /articles"],
    },
    ServiceInfo {
        name: "press-kits",
        description: "Press kit management: generate/cache press kits, return public URL",
        key_endpoints: &["GET /press-kits/:id", "POST /press-kits"],
    },
    ServiceInfo {
        name: "scraping",
        description: "Web scraping: extract structured data from URLs",
        key_endpoints: &["POST /scrape"],
    },
    ServiceInfo {
        name: "apollo",
        description: "Apollo.io integration: people search, enrichment",
        key_endpoints: &["POST /search", "POST /enrich"],
    },
    ServiceInfo {
        name: "ahref",
        description: "Ahrefs SEO data: backlinks, domain rating",
        key_endpoints: &["POST /analyze"],
    },
];

/// Render the catalog as a prompt section, optionally narrowed to a list of
/// service names from the caller's hints.
pub fn catalog_for_prompt(filter: Option<&[String]>) -> String {
    SERVICE_CATALOG
        .iter()
        .filter(|s| match filter {
            Some(names) => names.iter().any(|n| n == s.name),
            None => true,
        })
        .map(|s| {
            format!(
                "- **{}**: {}\n  Endpoints: {}",
                s.name,
                s.description,
                s.key_endpoints.join(", ")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
