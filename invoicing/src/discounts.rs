//! Discount code resolution.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

/// What a discount code resolves to.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedDiscount {
    pub active: bool,
    /// Whether the discount also applies to renewal charges.
    pub recurring: bool,
}

/// Resolves discount codes supplied at checkout.
#[async_trait]
pub trait DiscountResolver: Send + Sync {
    /// `None` when the code does not exist.
    async fn resolve(&self, code: &str) -> Option<ResolvedDiscount>;
}

/// Fixed in-memory resolver.
#[derive(Default)]
pub struct StaticDiscountResolver {
    codes: RwLock<HashMap<String, ResolvedDiscount>>,
}

impl StaticDiscountResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, code: &str, discount: ResolvedDiscount) {
        self.codes
            .write()
            .expect("discount registry poisoned")
            .insert(code.to_string(), discount);
    }
}

#[async_trait]
impl DiscountResolver for StaticDiscountResolver {
    async fn resolve(&self, code: &str) -> Option<ResolvedDiscount> {
        self.codes
            .read()
            .expect("discount registry poisoned")
            .get(code)
            .copied()
    }
}
