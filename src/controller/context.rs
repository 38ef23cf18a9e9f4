//! # Operation Context
//!
//! Immutable value carried through every store call, component deployer and workflow:
//! the target namespace, the owner stamped on created objects and the dry-run flag.

use crate::constants::STANDALONE_OWNER_NAME;
use crate::crd::SoftwareFactory;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::DynamicObject;
use kube::Resource;

#[derive(Debug, Clone, PartialEq)]
pub struct OperationContext {
    pub namespace: String,
    /// Owner of every created object; None until the owner is known
    pub owner: Option<OwnerReference>,
    /// Writes are validated by the store but not persisted
    pub dry_run: bool,
}

impl OperationContext {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            owner: None,
            dry_run: false,
        }
    }

    #[must_use]
    pub fn with_owner(mut self, owner: OwnerReference) -> Self {
        self.owner = Some(owner);
        self
    }

    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Context owned by a `SoftwareFactory` resource (managed mode)
    pub fn for_resource(sf: &SoftwareFactory, namespace: impl Into<String>) -> Self {
        let ctx = Self::new(namespace);
        match sf.controller_owner_ref(&()) {
            Some(owner) => ctx.with_owner(owner),
            None => ctx,
        }
    }

    /// Set the owner reference on an object about to be created
    ///
    /// The standalone ownership marker is never owned by itself.
    pub fn stamp_owner(&self, object: &mut DynamicObject) {
        let Some(owner) = &self.owner else {
            return;
        };
        if object.metadata.name.as_deref() == Some(STANDALONE_OWNER_NAME)
            && owner.name == STANDALONE_OWNER_NAME
        {
            return;
        }
        let refs = object.metadata.owner_references.get_or_insert_with(Vec::new);
        if !refs.iter().any(|r| r.uid == owner.uid) {
            refs.push(owner.clone());
        }
    }
}

/// Owner reference pointing at an arbitrary dynamic object (the standalone marker)
pub fn owner_reference_for(object: &DynamicObject) -> Option<OwnerReference> {
    let types = object.types.as_ref()?;
    Some(OwnerReference {
        api_version: types.api_version.clone(),
        kind: types.kind.clone(),
        name: object.metadata.name.clone()?,
        uid: object.metadata.uid.clone()?,
        controller: Some(true),
        block_owner_deletion: Some(true),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;

    fn owner() -> OwnerReference {
        OwnerReference {
            api_version: "v1".to_string(),
            kind: "ConfigMap".to_string(),
            name: STANDALONE_OWNER_NAME.to_string(),
            uid: "uid-1".to_string(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    fn named(name: &str) -> DynamicObject {
        DynamicObject {
            types: None,
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..ObjectMeta::default()
            },
            data: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_stamp_owner_is_idempotent() {
        let ctx = OperationContext::new("sf").with_owner(owner());
        let mut obj = named("zuul-config");
        ctx.stamp_owner(&mut obj);
        ctx.stamp_owner(&mut obj);
        assert_eq!(obj.metadata.owner_references.map(|r| r.len()), Some(1));
    }

    #[test]
    fn test_marker_is_not_self_owned() {
        let ctx = OperationContext::new("sf").with_owner(owner());
        let mut marker = named(STANDALONE_OWNER_NAME);
        ctx.stamp_owner(&mut marker);
        assert!(marker.metadata.owner_references.is_none());
    }
}
