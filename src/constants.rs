/// Adapter and catalog name constants shared by the CLI, configuration and registry.

// Adapter names (used in the `adapter` key of a catalog definition)
pub const GAIA_EDR3_ADAPTER: &str = "gaia_edr3";
pub const COLUMN_MAP_ADAPTER: &str = "column_map";

// Built-in catalog name
pub const GAIA_EDR3_CATALOG: &str = "gaia_edr3";
pub const GAIA_EDR3_URL: &str = "http://cdn.gea.esac.esa.int/Gaia/gedr3/gaia_source/";

/// Gaia EDR3 photometric conversion G - V = f(G_BP - G_RP).
/// Riello et al. 2021, A&A 649, A3, Table C2.
pub const GAIA_EDR3_V_COEFFS: [f64; 4] = [-0.02704, 0.01424, -0.2156, 0.01426];

// Default sky and magnitude cuts for LDT guide stars
pub const DEFAULT_MAX_VMAG: f64 = 18.0;
pub const DEFAULT_MIN_DEC: f64 = -40.0;

// Ledger table in the target store
pub const BATCH_LEDGER_TABLE: &str = "cat_ingest_batches";

pub const DEFAULT_CONFIG_PATH: &str = "cat_ingest.toml";
pub const CONFIG_PATH_ENV: &str = "CAT_INGEST_CONFIG";
pub const DATABASE_URL_ENV: &str = "CAT_DATABASE_URL";
pub const METRICS_ADDR_ENV: &str = "CAT_INGEST_METRICS_ADDR";

/// Column order of staged files and of the target table.
pub const POINTING_COLUMNS: [&str; 10] = [
    "name", "ra", "dec", "epoch", "pmra", "pmdec", "vmag", "g_mag", "g_bp", "g_rp",
];

/// Get all built-in adapter names
pub fn get_builtin_adapters() -> Vec<&'static str> {
    vec![GAIA_EDR3_ADAPTER, COLUMN_MAP_ADAPTER]
}
