//! The ERP entity catalog and the nested layouts the server exposes.
//!
//! Entities are addressable in URLs by slug (`sub-categories`) or by name
//! (`SubCategory`).

use duplex_engine::{EntityRegistry, LevelSpec, TreeSpec};

/// One addressable entity: URL slug, entity name, table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityInfo {
    pub slug: &'static str,
    pub name: &'static str,
    pub table: &'static str,
}

const fn entity(slug: &'static str, name: &'static str, table: &'static str) -> EntityInfo {
    EntityInfo { slug, name, table }
}

/// Every entity persisted in both stores.
pub const ENTITIES: &[EntityInfo] = &[
    // Master data
    entity("categories", "Category", "categories"),
    entity("sub-categories", "SubCategory", "sub_categories"),
    entity("divisions", "Division", "divisions"),
    entity("users", "User", "users"),
    entity("companies", "Company", "companies"),
    entity("customers", "Customer", "customers"),
    entity("products", "Product", "products"),
    entity("product-fields", "ProductField", "products_fields"),
    entity("flow-processes", "FlowProcess", "flow_processes"),
    entity("clauses", "Clause", "clause"),
    entity("clause-points", "ClausePoint", "clause_point"),
    entity("service-pricings", "ServicePricing", "service_pricing"),
    entity("service-pricing-variants", "ServicePricingVariant", "service_pricing_variant"),
    // Quotations
    entity("quotations", "Quotation", "quotations"),
    entity("quotation-categories", "QuotationCategory", "quotation_category"),
    entity("quotation-services", "QuotationService", "quotation_service"),
    entity("quotation-products", "QuotationProduct", "quotation_product"),
    entity("quotation-product-fields", "QuotationProductField", "quotation_product_field"),
    entity("quotation-payments", "QuotationPayment", "quotation_payment"),
    entity("quotation-payment-lists", "QuotationPaymentList", "quotation_payment_list"),
    entity("quotation-payment-services", "QuotationPaymentService", "quotation_payment_service"),
    // Contracts
    entity("contracts", "Contract", "contracts"),
    entity("contract-clauses", "ContractClause", "contract_clause"),
    entity("contract-clause-points", "ContractClausePoint", "contract_clause_point"),
    entity("contract-clause-logs", "ContractClauseLog", "contract_clause_log"),
    entity("contract-payments", "ContractPayment", "contract_payment"),
    entity("contract-payment-lists", "ContractPaymentList", "contract_payment_list"),
    entity("contract-payment-services", "ContractPaymentService", "contract_payment_service"),
    entity("contract-services", "ContractService", "contract_service"),
    entity(
        "contract-verification-progress",
        "ContractVerificationProgress",
        "contract_verification_progress",
    ),
];

/// Names of the nested layouts, as used in `/api/trees/{tree}`.
pub const TREES: &[&str] = &[
    "clauses",
    "products",
    "service-pricings",
    "quotations",
    "contracts",
];

/// Build the registry shared by both stores.
pub fn registry() -> EntityRegistry {
    ENTITIES.iter().fold(EntityRegistry::new(), |registry, info| {
        registry.with_entity(info.name, info.table)
    })
}

/// Look an entity up by slug or by name.
pub fn resolve(key: &str) -> Option<&'static EntityInfo> {
    ENTITIES
        .iter()
        .find(|info| info.slug == key || info.name == key)
}

/// The layout registered under `name`, if any.
pub fn tree(name: &str) -> Option<TreeSpec> {
    let layout = match name {
        "clauses" => TreeSpec::new("Clause")
            .with_child(LevelSpec::new("clause_points", "ClausePoint", "id_clause")),
        "products" => TreeSpec::new("Product")
            .with_child(LevelSpec::new("fields", "ProductField", "id_product")),
        "service-pricings" => TreeSpec::new("ServicePricing").with_child(LevelSpec::new(
            "variants",
            "ServicePricingVariant",
            "id_service_pricing",
        )),
        "quotations" => TreeSpec::new("Quotation")
            .with_child(quotation_categories())
            .with_child(quotation_payments()),
        "contracts" => TreeSpec::new("Contract")
            .with_child(contract_clauses())
            .with_child(contract_payments())
            .with_child(LevelSpec::new("services", "ContractService", "id_contract")),
        _ => return None,
    };
    Some(layout)
}

/// A top-level collection of a layout, for syncing it under an existing root.
pub fn collection(tree: &TreeSpec, name: &str) -> Option<LevelSpec> {
    tree.children
        .iter()
        .find(|level| level.collection == name)
        .cloned()
}

fn quotation_categories() -> LevelSpec {
    LevelSpec::new("categories", "QuotationCategory", "id_quotation")
        .with_child(LevelSpec::new(
            "services",
            "QuotationService",
            "id_quotation_category",
        ))
        .with_child(
            LevelSpec::new("products", "QuotationProduct", "id_quotation_category").with_child(
                LevelSpec::new("fields", "QuotationProductField", "id_quotation_product"),
            ),
        )
}

fn quotation_payments() -> LevelSpec {
    LevelSpec::new("payments", "QuotationPayment", "id_quotation").with_child(
        LevelSpec::new("payment_list", "QuotationPaymentList", "id_quotation_payment")
            .with_child(
                LevelSpec::new(
                    "services",
                    "QuotationPaymentService",
                    "id_quotation_payment_list",
                )
                .with_ancestor_key("id_quotation_payment", 1),
            ),
    )
}

/// Clause logs sit under a point or, with no point, under the clause.
fn contract_clauses() -> LevelSpec {
    LevelSpec::new("clauses", "ContractClause", "id_contract")
        .with_child(
            LevelSpec::new("clause_point", "ContractClausePoint", "id_contract_clause").with_child(
                LevelSpec::new("clause_logs", "ContractClauseLog", "id_contract_clause_point")
                    .with_ancestor_key("id_contract_clause", 1),
            ),
        )
        .with_child(
            LevelSpec::new("clause_logs", "ContractClauseLog", "id_contract_clause")
                .with_null_key("id_contract_clause_point"),
        )
}

fn contract_payments() -> LevelSpec {
    LevelSpec::new("payments", "ContractPayment", "id_contract").with_child(
        LevelSpec::new("payment_list", "ContractPaymentList", "id_contract_payment")
            .with_child(
                LevelSpec::new(
                    "services",
                    "ContractPaymentService",
                    "id_contract_payment_list",
                )
                .with_ancestor_key("id_contract_payment", 1),
            ),
    )
}
