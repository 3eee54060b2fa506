//! Relation inference from field naming conventions.
//!
//! For every ordered pair of distinct entities (A, B):
//! - many-to-many when A declares `plural(B)` and B declares `plural(A)`;
//! - one-to-many when A declares `id<B>` and B declares `plural(A)`.
//!
//! Relations are recorded on the owning side A, keyed by B's entity name. The first match
//! for a key wins. A scalar field that happens to match a plural entity name is
//! indistinguishable from a real relation.

use crate::case::{capitalize, to_camel_case};
use crate::schema::resolved::{InverseRelation, ModelMap, RelationDescriptor};
use indexmap::map::Entry;

/// Pluralization used to derive relation field names.
pub trait Inflector: Send + Sync {
    fn plural(&self, word: &str) -> String;
}

/// English pluralization rules (irregulars included) from the `pluralizer` crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct EnglishInflector;

impl Inflector for EnglishInflector {
    fn plural(&self, word: &str) -> String {
        pluralizer::pluralize(word, 2, false)
    }
}

/// Plural, camel-cased accessor name for an entity key: "blog_post" -> "blogPosts".
pub fn plural_accessor(inflector: &dyn Inflector, entity: &str) -> String {
    to_camel_case(&inflector.plural(entity))
}

/// Owning-field name for a one-to-many relation to `target`: "team" -> "idTeam".
pub fn foreign_field_name(target: &str) -> String {
    format!("id{}", capitalize(&to_camel_case(target)))
}

pub fn infer(model: &mut ModelMap) {
    infer_with(model, &EnglishInflector)
}

pub fn infer_with(model: &mut ModelMap, inflector: &dyn Inflector) {
    let plurals: Vec<(String, String)> = model
        .entities
        .keys()
        .map(|name| (name.clone(), plural_accessor(inflector, name)))
        .collect();

    let mut found: Vec<(String, String, RelationDescriptor)> = Vec::new();
    for (a, plural_a) in &plurals {
        let Some(entity_a) = model.entities.get(a) else { continue };
        for (b, plural_b) in &plurals {
            if a == b {
                continue;
            }
            let Some(entity_b) = model.entities.get(b) else { continue };
            if !entity_b.has_field(plural_a) {
                continue;
            }
            if entity_a.has_field(plural_b) {
                found.push((
                    a.clone(),
                    b.clone(),
                    RelationDescriptor::ManyToMany {
                        target: b.clone(),
                        plural_field: plural_b.clone(),
                    },
                ));
            }
            let id_b = foreign_field_name(b);
            if entity_a.has_field(&id_b) {
                found.push((
                    a.clone(),
                    b.clone(),
                    RelationDescriptor::OneToMany {
                        target: b.clone(),
                        foreign_field: id_b,
                    },
                ));
            }
        }
    }

    for (owner, key, relation) in found {
        let Some(entity) = model.entities.get_mut(&owner) else { continue };
        match entity.relations.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(relation);
            }
            Entry::Occupied(slot) => {
                tracing::debug!(
                    entity = %owner,
                    relation = %slot.key(),
                    ignored = ?relation,
                    "relation already inferred; keeping first match"
                );
            }
        }
    }

    let inverses: Vec<(String, String, InverseRelation)> = model
        .entities
        .values()
        .flat_map(|owner| {
            let plural_owner = plural_accessor(inflector, &owner.name);
            owner.relations.values().filter_map(move |rel| match rel {
                RelationDescriptor::OneToMany { target, foreign_field } => Some((
                    target.clone(),
                    plural_owner.clone(),
                    InverseRelation {
                        source: owner.name.clone(),
                        foreign_field: foreign_field.clone(),
                    },
                )),
                RelationDescriptor::ManyToMany { .. } => None,
            })
        })
        .collect();
    for (target, accessor, inverse) in inverses {
        if let Some(entity) = model.entities.get_mut(&target) {
            entity.inverse.entry(accessor).or_insert(inverse);
        }
    }

    for entity in model.entities.values() {
        tracing::debug!(
            entity = %entity.name,
            relations = entity.relations.len(),
            inverse = entity.inverse.len(),
            "relations inferred"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::metadata::build;
    use crate::schema::types::{FieldDefinition, ModelDefinition};
    use pretty_assertions::assert_eq;

    fn f(name: &str, ty: &str) -> FieldDefinition {
        FieldDefinition::new(name, ty)
    }

    fn inferred(models: Vec<ModelDefinition>) -> ModelMap {
        let mut map = build(&models);
        infer(&mut map);
        map
    }

    #[test]
    fn one_to_many_from_id_field_and_back_reference() {
        let map = inferred(vec![
            ModelDefinition::new("User", vec![f("id", "Int"), f("name", "String"), f("idTeam", "Int")]),
            ModelDefinition::new("Team", vec![f("id", "Int"), f("users", "User").list()]),
        ]);
        assert_eq!(
            map.get("user").unwrap().relation("team"),
            Some(&RelationDescriptor::OneToMany {
                target: "team".into(),
                foreign_field: "idTeam".into(),
            })
        );
        assert!(map.get("team").unwrap().relations.is_empty());
        assert_eq!(
            map.get("team").unwrap().inverse.get("users"),
            Some(&InverseRelation {
                source: "user".into(),
                foreign_field: "idTeam".into(),
            })
        );
    }

    #[test]
    fn one_to_many_requires_both_sides() {
        let map = inferred(vec![
            ModelDefinition::new("User", vec![f("id", "Int"), f("idTeam", "Int")]),
            ModelDefinition::new("Team", vec![f("id", "Int"), f("name", "String")]),
        ]);
        assert!(map.get("user").unwrap().relations.is_empty());
        assert!(map.get("team").unwrap().inverse.is_empty());
    }

    #[test]
    fn many_to_many_recorded_on_both_sides() {
        let map = inferred(vec![
            ModelDefinition::new("Post", vec![f("id", "Int"), f("tags", "Tag").list()]),
            ModelDefinition::new("Tag", vec![f("id", "Int"), f("posts", "Post").list()]),
        ]);
        assert_eq!(
            map.get("post").unwrap().relation("tag"),
            Some(&RelationDescriptor::ManyToMany {
                target: "tag".into(),
                plural_field: "tags".into(),
            })
        );
        assert_eq!(
            map.get("tag").unwrap().relation("post"),
            Some(&RelationDescriptor::ManyToMany {
                target: "post".into(),
                plural_field: "posts".into(),
            })
        );
    }

    #[test]
    fn many_to_many_needs_mutual_plurals() {
        let map = inferred(vec![
            ModelDefinition::new("Post", vec![f("id", "Int"), f("tags", "Tag").list()]),
            ModelDefinition::new("Tag", vec![f("id", "Int"), f("label", "String")]),
        ]);
        assert!(map.get("post").unwrap().relations.is_empty());
        assert!(map.get("tag").unwrap().relations.is_empty());
    }

    #[test]
    fn irregular_plurals_and_camel_case() {
        let map = inferred(vec![
            ModelDefinition::new("Person", vec![f("id", "Int"), f("categories", "Category").list()]),
            ModelDefinition::new("Category", vec![f("id", "Int"), f("people", "Person").list()]),
        ]);
        assert!(map.get("person").unwrap().relation("category").is_some());
        assert!(map.get("category").unwrap().relation("person").is_some());
        assert_eq!(foreign_field_name("blog_post"), "idBlogPost");
    }

    #[test]
    fn first_match_wins_for_a_key() {
        // Both conventions match user -> team; many-to-many is tested first.
        let map = inferred(vec![
            ModelDefinition::new("User", vec![f("idTeam", "Int"), f("teams", "Team").list()]),
            ModelDefinition::new("Team", vec![f("users", "User").list()]),
        ]);
        assert!(matches!(
            map.get("user").unwrap().relation("team"),
            Some(RelationDescriptor::ManyToMany { .. })
        ));
    }

    struct Suffix;

    impl Inflector for Suffix {
        fn plural(&self, word: &str) -> String {
            format!("{}List", word)
        }
    }

    #[test]
    fn inflector_is_swappable() {
        let mut map = build(&[
            ModelDefinition::new("Post", vec![f("tagList", "Tag").list()]),
            ModelDefinition::new("Tag", vec![f("postList", "Post").list()]),
        ]);
        infer_with(&mut map, &Suffix);
        assert!(map.get("post").unwrap().relation("tag").is_some());
    }
}
