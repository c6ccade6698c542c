//! Material weight estimation
//!
//! External collaborator seam: when a scanned item arrives without a measured
//! weight, the engine asks an estimator for the material's average weight.
//! The static table ships the catalogue averages; deployments can plug in a
//! live lookup behind the same trait.

use rust_decimal::Decimal;
use std::collections::HashMap;

/// Average-weight lookup keyed by material type
pub trait WeightEstimator: Send + Sync {
    /// Average item weight in grams for a material type, if known
    fn average_weight_grams(&self, material_type: &str) -> Option<Decimal>;
}

/// Static catalogue of average item weights
#[derive(Debug, Clone)]
pub struct StaticWeightTable {
    table: HashMap<String, Decimal>,
}

impl StaticWeightTable {
    /// Catalogue averages per material type, grams
    pub fn new() -> Self {
        let mut table = HashMap::new();
        table.insert("plastic".to_string(), Decimal::from(25u32));
        table.insert("paper".to_string(), Decimal::from(5u32));
        table.insert("metal".to_string(), Decimal::from(15u32));
        table.insert("glass".to_string(), Decimal::from(300u32));
        Self { table }
    }

    /// Add or override one material's average
    pub fn with_entry(mut self, material_type: &str, average_grams: Decimal) -> Self {
        self.table
            .insert(material_type.to_ascii_lowercase(), average_grams);
        self
    }
}

impl Default for StaticWeightTable {
    fn default() -> Self {
        Self::new()
    }
}

impl WeightEstimator for StaticWeightTable {
    fn average_weight_grams(&self, material_type: &str) -> Option<Decimal> {
        self.table.get(&material_type.to_ascii_lowercase()).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_known_materials() {
        let table = StaticWeightTable::new();
        assert_eq!(table.average_weight_grams("Plastic"), Some(dec!(25)));
        assert_eq!(table.average_weight_grams("glass"), Some(dec!(300)));
    }

    #[test]
    fn test_unknown_material() {
        let table = StaticWeightTable::new();
        assert_eq!(table.average_weight_grams("Unobtainium"), None);
    }

    #[test]
    fn test_override() {
        let table = StaticWeightTable::new().with_entry("Textile", dec!(150));
        assert_eq!(table.average_weight_grams("textile"), Some(dec!(150)));
    }
}
