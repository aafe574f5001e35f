use dirs::home_dir;
use std::path::PathBuf;

/// Returns the updraft home directory, or None if the user's home cannot be resolved.
///
/// `UPDRAFT_HOME` overrides the default `~/.updraft`.
pub fn try_updraft_home() -> Option<PathBuf> {
    if let Ok(val) = std::env::var("UPDRAFT_HOME") {
        return Some(PathBuf::from(val));
    }
    home_dir().map(|h| h.join(".updraft"))
}

/// Package cache for one application: ~/.updraft/packages/<app id>
pub fn packages_path(app_id: &str) -> Option<PathBuf> {
    try_updraft_home().map(|home| home.join("packages").join(app_id.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packages_path_is_per_app() {
        if let Some(path) = packages_path("DemoApp") {
            assert!(path.ends_with("packages/demoapp"));
        }
    }
}
