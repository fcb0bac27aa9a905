//! The `$metadata-summary` document.
//!
//! A navigation aid for LLM agents: per-entity descriptions, filter recipes,
//! join hints, and the query-parameter rules the sanitiser enforces. The
//! field set is stable but the document is advisory, not wire-critical.

use serde_json::{json, Map, Value};

use crate::catalog;

/// Per-entity prose that does not belong in the sanitiser's catalog.
struct EntityGuide {
    description: &'static str,
    filter_examples: &'static [&'static str],
    join_info: &'static str,
    key_fields: &'static [&'static str],
    note: &'static str,
}

fn guide_for(entity: &str) -> EntityGuide {
    match entity {
        "Units" => EntityGuide {
            description: "Rentable units (apartments, offices, parking spots). The central entity most queries start from.",
            filter_examples: &[
                "$filter=City eq 'Delft'",
                "$filter=IsVacant eq true",
                "$filter=Surface gt 80",
            ],
            join_info: "UnitId is referenced by Agreements and Tasks; BuildingId links a unit to its building.",
            key_fields: &["UnitId", "Reference"],
            note: "Prefer $select to trim wide unit rows before joining.",
        },
        "Buildings" => EntityGuide {
            description: "Buildings that group units, with address and construction data.",
            filter_examples: &["$filter=City eq 'Rotterdam'", "$filter=ConstructionYear ge 2000"],
            join_info: "BuildingId is referenced by Units; ComplexId groups buildings into complexes.",
            key_fields: &["BuildingId", "Reference"],
            note: "",
        },
        "Complexes" => EntityGuide {
            description: "Top-level groupings of buildings, usually one per site or portfolio.",
            filter_examples: &["$filter=City eq 'Den Haag'"],
            join_info: "ComplexId is referenced by Buildings.",
            key_fields: &["ComplexId", "Reference"],
            note: "",
        },
        "FinancialMutations" => EntityGuide {
            description: "Ledger mutations. Large collection; a $filter is mandatory and $top is capped at 100.",
            filter_examples: &[
                "$filter=FinancialYear eq 2025",
                "$filter=MutationDate ge 2025-01-01T00:00:00Z",
                "$filter=LedgerCode eq '8000' and FinancialYear eq 2025",
            ],
            join_info: "Mutations reference invoices via InvoiceId where applicable.",
            key_fields: &["FinancialMutationId"],
            note: "Always scope by FinancialYear or a MutationDate range first.",
        },
        "Invoices" => EntityGuide {
            description: "Outgoing invoices with amounts and payment status. A $filter is mandatory.",
            filter_examples: &[
                "$filter=Status eq 'Open'",
                "$filter=InvoiceDate ge 2025-01-01T00:00:00Z",
                "$filter=OutstandingAmount gt 0",
            ],
            join_info: "RelationId links an invoice to the billed relation; AgreementId to the originating agreement.",
            key_fields: &["InvoiceId", "Reference"],
            note: "OutstandingAmount is the open remainder, not the invoice total.",
        },
        "Relations" => EntityGuide {
            description: "Tenants, owners, and suppliers: every party the administration deals with.",
            filter_examples: &[
                "$filter=RelationType eq 'Tenant'",
                "$filter=City eq 'Utrecht'",
            ],
            join_info: "RelationId is referenced by Agreements and Invoices.",
            key_fields: &["RelationId", "Reference"],
            note: "",
        },
        "Agreements" => EntityGuide {
            description: "Rental agreements binding a relation to a unit for a period.",
            filter_examples: &[
                "$filter=EndDate eq null",
                "$filter=StartDate ge 2024-01-01T00:00:00Z",
            ],
            join_info: "UnitId and RelationId tie an agreement to its unit and tenant.",
            key_fields: &["AgreementId", "Reference"],
            note: "An open-ended agreement has EndDate eq null.",
        },
        "Tasks" => EntityGuide {
            description: "Work items such as maintenance requests and inspections.",
            filter_examples: &["$filter=Status eq 'Open'", "$filter=DueDate lt 2026-01-01T00:00:00Z"],
            join_info: "Tasks may reference a UnitId when tied to a specific unit.",
            key_fields: &["TaskId", "Reference"],
            note: "",
        },
        _ => EntityGuide {
            description: "",
            filter_examples: &[],
            join_info: "",
            key_fields: &[],
            note: "",
        },
    }
}

/// Assemble the full summary document.
pub fn summary_document() -> Value {
    let mut entities = Map::new();
    for descriptor in catalog::all_entities() {
        let guide = guide_for(descriptor.name);
        entities.insert(
            descriptor.name.to_string(),
            json!({
                "description": guide.description,
                "sortableFields": descriptor.sortable_fields,
                "topCap": descriptor.top_cap,
                "requiresFilter": descriptor.requires_filter,
                "filterExamples": guide.filter_examples,
                "joinInfo": guide.join_info,
                "keyFields": guide.key_fields,
                "note": guide.note,
            }),
        );
    }

    json!({
        "entities": entities,
        "commonJoins": [
            "Units.BuildingId -> Buildings.BuildingId",
            "Buildings.ComplexId -> Complexes.ComplexId",
            "Agreements.UnitId -> Units.UnitId",
            "Agreements.RelationId -> Relations.RelationId",
            "Invoices.RelationId -> Relations.RelationId",
            "FinancialMutations.InvoiceId -> Invoices.InvoiceId",
        ],
        "entityLinkTypes": {
            "Units": "physical",
            "Buildings": "physical",
            "Complexes": "physical",
            "Relations": "party",
            "Agreements": "contractual",
            "Invoices": "financial",
            "FinancialMutations": "financial",
            "Tasks": "operational",
        },
        "queryParameters": {
            "$filter": "Supported. Mandatory on FinancialMutations and Invoices.",
            "$select": "Supported, passed through unchanged.",
            "$orderby": "Supported; fields are validated against sortableFields and unknown fields are dropped.",
            "$top": "Supported; capped per entity (see topCap). Invalid values are removed.",
            "$skip": "Supported, passed through unchanged.",
            "$count": "Supported, passed through unchanged.",
            "$expand": "Passed through; prefer explicit joins via key fields for predictable payloads.",
        },
        "agentRules": [
            "Always filter large collections before sorting or paging.",
            "Use the canonical entity spelling from this document in paths.",
            "Request only the fields you need with $select.",
            "Treat $top as a page size, not a result guarantee; follow @odata.nextLink for more.",
        ],
        "businessInsights": [
            "Vacancy analysis starts from Units with IsVacant eq true.",
            "Arrears are Invoices with OutstandingAmount gt 0, grouped by RelationId.",
            "Yearly ledger reviews scope FinancialMutations by FinancialYear.",
        ],
        "crossEntityInsights": [
            "Unit -> Agreement -> Relation answers 'who rents what'.",
            "Relation -> Invoice -> FinancialMutation answers 'who paid what'.",
        ],
        "ownerWorkflows": [
            "Portfolio overview: Complexes, then Buildings, then Units.",
            "Monthly statement: FinancialMutations filtered to the period, joined to Invoices.",
        ],
        "commonFilterIssues": [
            "Date literals must be ISO 8601 without quotes (MutationDate ge 2025-01-01T00:00:00Z).",
            "String literals use single quotes (City eq 'Delft').",
            "null comparisons use eq null, not eq 'null'.",
        ],
    })
}
