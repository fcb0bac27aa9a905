//! Curated catalog of Bloxs OData entity sets.
//!
//! The catalog is the allowlist behind query sanitisation: only fields listed
//! here survive in `$orderby`, and the per-entity caps bound `$top`.
//! Entity names are canonical (upstream is case-sensitive); lookups here are
//! case-insensitive.

/// Descriptor for one entity set on the Bloxs feed.
#[derive(Debug)]
pub struct EntityDescriptor {
    pub name: &'static str,
    /// Ordered; the first `*Id`/`Reference` field doubles as the safe
    /// `$orderby` fallback.
    pub sortable_fields: &'static [&'static str],
    pub top_cap: u32,
    /// Large collections that must never be fetched unfiltered.
    pub requires_filter: bool,
}

/// Cap applied when an entity is unknown.
pub const DEFAULT_TOP_CAP: u32 = 500;

/// Sortable fields assumed for unknown entities.
pub static DEFAULT_SORTABLE_FIELDS: &[&str] = &["Id", "Reference", "DisplayName", "Name"];

static ENTITIES: &[EntityDescriptor] = &[
    EntityDescriptor {
        name: "Units",
        sortable_fields: &[
            "UnitId",
            "Reference",
            "DisplayName",
            "UnitType",
            "Surface",
            "City",
            "Street",
            "PostalCode",
            "IsVacant",
        ],
        top_cap: 500,
        requires_filter: false,
    },
    EntityDescriptor {
        name: "Buildings",
        sortable_fields: &[
            "BuildingId",
            "Reference",
            "DisplayName",
            "City",
            "Street",
            "PostalCode",
            "ConstructionYear",
        ],
        top_cap: 500,
        requires_filter: false,
    },
    EntityDescriptor {
        name: "Complexes",
        sortable_fields: &["ComplexId", "Reference", "DisplayName", "City"],
        top_cap: 500,
        requires_filter: false,
    },
    EntityDescriptor {
        name: "FinancialMutations",
        sortable_fields: &[
            "FinancialMutationId",
            "MutationDate",
            "FinancialYear",
            "Period",
            "Amount",
            "LedgerCode",
            "Description",
        ],
        top_cap: 100,
        requires_filter: true,
    },
    EntityDescriptor {
        name: "Invoices",
        sortable_fields: &[
            "InvoiceId",
            "Reference",
            "InvoiceDate",
            "DueDate",
            "TotalAmount",
            "OutstandingAmount",
            "Status",
        ],
        top_cap: 200,
        requires_filter: true,
    },
    EntityDescriptor {
        name: "Relations",
        sortable_fields: &[
            "RelationId",
            "Reference",
            "DisplayName",
            "Name",
            "City",
            "Email",
            "RelationType",
        ],
        top_cap: 500,
        requires_filter: false,
    },
    EntityDescriptor {
        name: "Agreements",
        sortable_fields: &[
            "AgreementId",
            "Reference",
            "StartDate",
            "EndDate",
            "UnitId",
            "RelationId",
            "MonthlyRent",
        ],
        top_cap: 500,
        requires_filter: false,
    },
    EntityDescriptor {
        name: "Tasks",
        sortable_fields: &[
            "TaskId",
            "Reference",
            "Subject",
            "Status",
            "CreatedDate",
            "DueDate",
        ],
        top_cap: 500,
        requires_filter: false,
    },
];

/// Spellings seen in client paths that are not the canonical segment.
/// Canonical names themselves also resolve (in any casing) via the
/// descriptor table, so only genuine aliases are listed here.
static PATH_ALIASES: &[(&str, &str)] = &[
    ("unit", "Units"),
    ("building", "Buildings"),
    ("objects", "Buildings"),
    ("complex", "Complexes"),
    ("financialmutation", "FinancialMutations"),
    ("mutations", "FinancialMutations"),
    ("invoice", "Invoices"),
    ("relation", "Relations"),
    ("contact", "Relations"),
    ("contacts", "Relations"),
    ("agreement", "Agreements"),
    ("contract", "Agreements"),
    ("contracts", "Agreements"),
    ("task", "Tasks"),
];

/// Look up an entity descriptor, case-insensitively.
pub fn descriptor_for(entity: &str) -> Option<&'static EntityDescriptor> {
    ENTITIES.iter().find(|d| d.name.eq_ignore_ascii_case(entity))
}

/// All known entity descriptors, in catalog order.
pub fn all_entities() -> &'static [EntityDescriptor] {
    ENTITIES
}

/// Sortable fields for an entity, falling back to the generic set.
pub fn fields_for(entity: &str) -> &'static [&'static str] {
    descriptor_for(entity)
        .map(|d| d.sortable_fields)
        .unwrap_or(DEFAULT_SORTABLE_FIELDS)
}

/// `$top` cap for an entity, falling back to [`DEFAULT_TOP_CAP`].
pub fn top_cap_for(entity: &str) -> u32 {
    descriptor_for(entity).map(|d| d.top_cap).unwrap_or(DEFAULT_TOP_CAP)
}

/// Whether the entity must carry a `$filter` before the upstream is contacted.
pub fn requires_filter(entity: &str) -> bool {
    descriptor_for(entity).map(|d| d.requires_filter).unwrap_or(false)
}

/// Resolve a path segment to the canonical entity spelling, if known.
///
/// Returns `None` for segments the catalog has never heard of; the router
/// forwards those untouched and lets the upstream decide.
pub fn alias_for(segment: &str) -> Option<&'static str> {
    if let Some(d) = descriptor_for(segment) {
        return Some(d.name);
    }
    PATH_ALIASES
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(segment))
        .map(|(_, canonical)| *canonical)
}
