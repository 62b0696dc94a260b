//! CRUD metadata describing what a resource type supports and how its
//! operations are rendered to users.

use std::fmt;
use std::sync::Arc;

use crate::resource::{Resource, ResourceOptions};

/// Display name set for one CRUD verb.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrudNames {
    pub upper: String,
    pub lower: String,
    pub capital: String,
    pub ed: String,
    pub ing: String,
}

impl CrudNames {
    /// Regular English conjugation for a verb, with the usual final-consonant
    /// doubling (`stop` -> `stopped`).
    pub fn for_verb(verb: &str) -> Self {
        let lower = verb.to_lowercase();
        let stem = if lower.ends_with('e') {
            lower[..lower.len() - 1].to_string()
        } else if doubles_final_consonant(&lower) {
            let last = lower.chars().last().unwrap();
            format!("{lower}{last}")
        } else {
            lower.clone()
        };
        let mut capital = lower.clone();
        if let Some(first) = capital.get_mut(..1) {
            first.make_ascii_uppercase();
        }
        Self {
            upper: lower.to_uppercase(),
            capital,
            ed: format!("{stem}ed"),
            ing: format!("{stem}ing"),
            lower,
        }
    }
}

fn doubles_final_consonant(verb: &str) -> bool {
    let chars: Vec<char> = verb.chars().collect();
    match chars.as_slice() {
        [.., a, b, c] => {
            !is_vowel(*a) && is_vowel(*b) && !is_vowel(*c) && !matches!(c, 'w' | 'x' | 'y')
        }
        _ => false,
    }
}

fn is_vowel(c: char) -> bool {
    matches!(c, 'a' | 'e' | 'i' | 'o' | 'u')
}

/// Create metadata. `start_on_create` makes a successful create flow directly
/// into a start of the same resource.
#[derive(Debug, Clone)]
pub struct CreateCrud {
    pub names: CrudNames,
    pub start_on_create: bool,
}

/// Metadata for the remaining verbs.
#[derive(Debug, Clone)]
pub struct VerbCrud {
    pub names: CrudNames,
}

impl VerbCrud {
    pub fn for_verb(verb: &str) -> Self {
        Self {
            names: CrudNames::for_verb(verb),
        }
    }
}

/// The CRUD surface of one resource type. `start`/`stop`/`describe` are
/// optional; their absence makes the corresponding manager operation a
/// precondition error.
#[derive(Debug, Clone)]
pub struct CrudMetadata {
    pub create: CreateCrud,
    pub delete: VerbCrud,
    pub start: Option<VerbCrud>,
    pub stop: Option<VerbCrud>,
    pub describe: Option<VerbCrud>,
}

impl CrudMetadata {
    /// Full CRUD surface with regular names.
    pub fn full(start_on_create: bool) -> Self {
        Self {
            create: CreateCrud {
                names: CrudNames::for_verb("create"),
                start_on_create,
            },
            delete: VerbCrud::for_verb("delete"),
            start: Some(VerbCrud::for_verb("start")),
            stop: Some(VerbCrud::for_verb("stop")),
            describe: Some(VerbCrud::for_verb("describe")),
        }
    }

    /// Create/delete only; start and stop are unsupported.
    pub fn create_delete_only() -> Self {
        Self {
            create: CreateCrud {
                names: CrudNames::for_verb("create"),
                start_on_create: false,
            },
            delete: VerbCrud::for_verb("delete"),
            start: None,
            stop: None,
            describe: None,
        }
    }
}

/// Filter applied by `get_resources` before handing snapshots to callers.
pub type ResourceFilter = Arc<dyn Fn(&[Resource], &ResourceOptions) -> Vec<Resource> + Send + Sync>;

/// Everything the manager needs to know about one resource type.
#[derive(Clone)]
pub struct ResourceTypeDescriptor {
    pub plugin: String,
    pub name: String,
    pub crud: CrudMetadata,
    pub filter: Option<ResourceFilter>,
}

impl ResourceTypeDescriptor {
    pub fn new(plugin: impl Into<String>, name: impl Into<String>, crud: CrudMetadata) -> Self {
        Self {
            plugin: plugin.into(),
            name: name.into(),
            crud,
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: ResourceFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn filter_resources(
        &self,
        resources: Vec<Resource>,
        options: &ResourceOptions,
    ) -> Vec<Resource> {
        match &self.filter {
            Some(filter) => filter(&resources, options),
            None => resources,
        }
    }
}

impl fmt::Debug for ResourceTypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceTypeDescriptor")
            .field("plugin", &self.plugin)
            .field("name", &self.name)
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regular_verb_names() {
        let names = CrudNames::for_verb("start");
        assert_eq!(names.upper, "START");
        assert_eq!(names.lower, "start");
        assert_eq!(names.capital, "Start");
        assert_eq!(names.ed, "started");
        assert_eq!(names.ing, "starting");
    }

    #[test]
    fn final_consonant_doubling() {
        let names = CrudNames::for_verb("stop");
        assert_eq!(names.ed, "stopped");
        assert_eq!(names.ing, "stopping");
    }

    #[test]
    fn trailing_e_dropped() {
        let names = CrudNames::for_verb("create");
        assert_eq!(names.ed, "created");
        assert_eq!(names.ing, "creating");
    }

    #[test]
    fn create_delete_only_has_no_start_stop() {
        let crud = CrudMetadata::create_delete_only();
        assert!(crud.start.is_none());
        assert!(crud.stop.is_none());
    }
}
