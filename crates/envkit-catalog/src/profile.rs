//! Named extension bundles from `profiles.toml`

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Named, curated bundle of extensions installed together.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Profile {
    #[serde(skip)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Member ids in declaration order.
    pub extensions: Vec<String>,
}

/// On-disk shape of `profiles.toml`.
///
/// ```toml
/// [profiles.minimal]
/// description = "Smallest useful environment"
/// extensions = ["nodejs", "python"]
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProfilesFile {
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

impl ProfilesFile {
    /// Consume the file into named profiles.
    pub fn into_profiles(self) -> BTreeMap<String, Profile> {
        self.profiles
            .into_iter()
            .map(|(name, mut profile)| {
                profile.name = name.clone();
                (name, profile)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiles_get_their_names() {
        let file: ProfilesFile = toml::from_str(
            r#"
[profiles.minimal]
extensions = ["nodejs", "python"]

[profiles.ai]
description = "Agents"
extensions = ["claude-code"]
"#,
        )
        .unwrap();

        let profiles = file.into_profiles();
        assert_eq!(profiles["minimal"].name, "minimal");
        assert_eq!(profiles["minimal"].extensions, vec!["nodejs", "python"]);
        assert_eq!(profiles["ai"].description.as_deref(), Some("Agents"));
    }
}
