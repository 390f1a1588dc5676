//! Field sets a service needs before it can resolve a field on an entity it doesn't own.
//!
//! Crossing from one service to another goes through `_entities`: the first service returns a
//! representation of each entity (`__typename` plus a key, and any `@requires` fields), which
//! the second service uses to look the entities up.

use apollo_compiler::Name;

use crate::error::PlannerError;
use crate::error::Result;
use crate::operation::SelectionSet;
use crate::operation::normalize::CollectedField;
use crate::operation::normalize::FieldCollector;
use crate::operation::normalize::Scope;
use crate::schema::ComposedSchema;
use crate::schema::FieldMetadata;

pub(crate) struct RequirementResolver<'a> {
    schema: &'a ComposedSchema,
    collector: &'a FieldCollector<'a>,
}

impl<'a> RequirementResolver<'a> {
    pub(crate) fn new(schema: &'a ComposedSchema, collector: &'a FieldCollector<'a>) -> Self {
        Self { schema, collector }
    }

    /// The representation of `type_name` that `service` accepts: `__typename`, then for each
    /// possible runtime type one of the keys the service declares for it.
    ///
    /// When a type has several keys, the one with the fewest fields not `available` yet wins;
    /// ties go to the key declared first. Returns `None` when the service declares no key for
    /// any of the possible types.
    pub(crate) fn key_fields(
        &self,
        type_name: &Name,
        service: &str,
        available: impl Fn(&CollectedField) -> bool,
    ) -> Result<Option<Vec<CollectedField>>> {
        let scope = Scope::new(self.schema, type_name)?;
        let mut fields = vec![CollectedField::typename(self.schema, scope.clone())?];
        let mut found = false;
        for possible_type in scope.possible_types.iter() {
            let candidates = self
                .schema
                .keys(possible_type, service)
                .iter()
                .map(|key| self.collect(possible_type, key))
                .collect::<Result<Vec<_>>>()?;
            let best = candidates.into_iter().min_by_key(|key| {
                key.iter()
                    .filter(|field| !available(*field))
                    .count()
            });
            if let Some(key) = best {
                found = true;
                fields.extend(key);
            }
        }
        Ok(found.then_some(fields))
    }

    /// Like [`Self::key_fields`], but a missing key is an error blamed on `field_name`.
    pub(crate) fn entity_key(
        &self,
        type_name: &Name,
        field_name: &Name,
        service: &str,
        available: impl Fn(&CollectedField) -> bool,
    ) -> Result<Vec<CollectedField>> {
        self.key_fields(type_name, service, available)?
            .ok_or_else(|| PlannerError::UnresolvableRequirement {
                type_name: type_name.to_string(),
                field_name: field_name.to_string(),
                service: service.to_owned(),
            })
    }

    /// `__typename` and every key `service` declares for the possible types of `type_name`.
    pub(crate) fn all_key_fields(
        &self,
        type_name: &Name,
        service: &str,
    ) -> Result<Vec<CollectedField>> {
        let scope = Scope::new(self.schema, type_name)?;
        let mut fields = vec![CollectedField::typename(self.schema, scope.clone())?];
        for possible_type in scope.possible_types.iter() {
            for key in self.schema.keys(possible_type, service) {
                fields.extend(self.collect(possible_type, key)?);
            }
        }
        Ok(fields)
    }

    /// The `@requires` selection of a field, on its parent type.
    pub(crate) fn requires_fields(&self, field: &FieldMetadata) -> Result<Vec<CollectedField>> {
        match &field.requires {
            Some(requires) => self.collect(&field.parent_type, requires),
            None => Ok(Vec::new()),
        }
    }

    /// Fields of the object returned by `field` that `service` can resolve without another
    /// hop: every key it declares for the return type, plus what the field `@provides`.
    pub(crate) fn provided_fields(
        &self,
        field: &FieldMetadata,
        service: &str,
    ) -> Result<Vec<CollectedField>> {
        let return_type = field.return_type();
        if !self.schema.is_composite_type(return_type) {
            return Ok(Vec::new());
        }
        let mut provided = self.all_key_fields(return_type, service)?;
        if let Some(provides) = &field.provides {
            provided.extend(self.collect(return_type, provides)?);
        }
        Ok(provided)
    }

    fn collect(&self, type_name: &Name, field_set: &SelectionSet) -> Result<Vec<CollectedField>> {
        self.collector
            .collect_fields(&Scope::new(self.schema, type_name)?, field_set)
    }
}
