use crate::{Error, Result};

/// A project qualified by its cluster, written `<cluster>:<project>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProjectRef {
    pub cluster: String,
    pub project: String,
}

impl ProjectRef {
    pub fn parse(reference: &str) -> Result<Self> {
        match reference.split_once(':') {
            Some((cluster, project))
                if !cluster.is_empty() && !project.is_empty() && !project.contains(':') =>
            {
                Ok(Self {
                    cluster: cluster.to_string(),
                    project: project.to_string(),
                })
            }
            _ => Err(Error::InvalidScope(reference.to_string())),
        }
    }
}

impl std::fmt::Display for ProjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.cluster, self.project)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse() {
        assert_eq!(
            ProjectRef::parse("c-abc:p-xyz"),
            Ok(ProjectRef {
                cluster: "c-abc".to_string(),
                project: "p-xyz".to_string(),
            })
        );
        for bad in ["", "c-abc", ":p-xyz", "c-abc:", "a:b:c"] {
            assert_eq!(
                ProjectRef::parse(bad),
                Err(Error::InvalidScope(bad.to_string()))
            );
        }
    }
}
