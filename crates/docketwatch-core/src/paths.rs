use std::env;
use std::path::PathBuf;

/// Name of the state directory created under the user's home.
const STATE_DIR_NAME: &str = ".docketwatch";

/// First non-empty of HOME and USERPROFILE.
fn home_dir() -> Option<PathBuf> {
    ["HOME", "USERPROFILE"]
        .into_iter()
        .filter_map(|key| env::var_os(key))
        .find(|value| !value.is_empty())
        .map(PathBuf::from)
}

/// Default directory for persisted daemon state (`~/.docketwatch`).
pub fn default_state_dir() -> Result<PathBuf, String> {
    home_dir()
        .map(|home| home.join(STATE_DIR_NAME))
        .ok_or_else(|| "Cannot locate a state directory: neither HOME nor USERPROFILE is set".to_string())
}
