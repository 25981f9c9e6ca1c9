use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "config.yaml";

pub fn orgmapper_root(home: &Path) -> PathBuf {
    home.join(".orgmapper")
}

pub fn tenants_root(home: &Path) -> PathBuf {
    orgmapper_root(home).join("tenants")
}

pub fn config_path(home: &Path) -> PathBuf {
    orgmapper_root(home).join(CONFIG_FILE)
}

/// `<home>/.orgmapper/tenants/<namespace>/<name>.yaml`: pure, no I/O.
pub fn tenant_path(home: &Path, namespace: &str, name: &str) -> PathBuf {
    tenants_root(home)
        .join(namespace)
        .join(format!("{name}.yaml"))
}
