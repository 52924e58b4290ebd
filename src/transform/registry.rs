use std::collections::HashMap;
use std::sync::Arc;

use super::adapters::{ColumnMapAdapter, GaiaEdr3Adapter};
use super::CatalogAdapter;
use crate::config::{CatalogConfig, Config};
use crate::constants;
use crate::error::{IngestError, Result};

/// Catalog name to adapter, built from the configured catalogs
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn CatalogAdapter>>,
}

impl AdapterRegistry {
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut registry = Self {
            adapters: HashMap::new(),
        };
        for catalog in &config.catalogs {
            registry.register(&catalog.name, build_adapter(catalog)?);
        }
        Ok(registry)
    }

    /// Register (or replace) the adapter for a catalog
    pub fn register(&mut self, catalog: &str, adapter: Arc<dyn CatalogAdapter>) {
        self.adapters.insert(catalog.to_string(), adapter);
    }

    pub fn get(&self, catalog: &str) -> Result<Arc<dyn CatalogAdapter>> {
        self.adapters
            .get(catalog)
            .cloned()
            .ok_or_else(|| IngestError::UnknownCatalog(catalog.to_string()))
    }

    /// Registered catalog names, sorted
    pub fn list_catalogs(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.adapters.keys().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names
    }
}

fn build_adapter(catalog: &CatalogConfig) -> Result<Arc<dyn CatalogAdapter>> {
    match catalog.adapter.as_str() {
        constants::GAIA_EDR3_ADAPTER => Ok(Arc::new(GaiaEdr3Adapter::new(catalog.default_epoch))),
        constants::COLUMN_MAP_ADAPTER => {
            let columns = catalog.columns.clone().ok_or_else(|| {
                IngestError::Config(format!("catalog '{}' has no column map", catalog.name))
            })?;
            Ok(Arc::new(ColumnMapAdapter::new(columns, catalog.default_epoch)))
        }
        other => Err(IngestError::UnknownAdapter(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_has_default_gaia_catalog() {
        let registry = AdapterRegistry::from_config(&Config::default()).unwrap();
        assert_eq!(registry.list_catalogs(), vec!["gaia_edr3"]);
        assert_eq!(registry.get("gaia_edr3").unwrap().name(), "gaia_edr3");
    }

    #[test]
    fn test_unknown_catalog_is_an_error() {
        let registry = AdapterRegistry::from_config(&Config::default()).unwrap();
        assert!(matches!(registry.get("tycho2"), Err(IngestError::UnknownCatalog(_))));
    }

    #[test]
    fn test_unknown_adapter_is_an_error() {
        let mut config = Config::default();
        config.catalogs[0].adapter = "fits_binary".to_string();
        assert!(matches!(
            AdapterRegistry::from_config(&config),
            Err(IngestError::UnknownAdapter(_))
        ));
    }
}
