//! Scenario files
//!
//! A scenario describes an installation as TOML: groups, users with their
//! memberships, objects and the links between them. Loading one builds a
//! fresh in-memory kernel in that state.
//!
//! ```toml
//! [[groups]]
//! name = "lab"
//! permission = "rwr---"
//!
//! [[users]]
//! name = "ana"
//! groups = ["lab"]
//! owner_of = ["lab"]
//!
//! [[objects]]
//! name = "cells"
//! kind = "Image"
//! owner = "ana"
//! group = "lab"
//! ```

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tenantry_core::{
    Details, GroupId, LinkId, LinkKind, Mutation, ObjectRef, ObjectStore, Permission, StoredLink,
    StoredObject, TenantryConfig, UserId,
};
use tenantry_kernel::{Kernel, NewExperimenter, NewGroup, StaticCredentials};
use tracing::debug;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub groups: Vec<GroupSpec>,
    #[serde(default)]
    pub users: Vec<UserSpec>,
    #[serde(default)]
    pub objects: Vec<ObjectSpec>,
    #[serde(default)]
    pub links: Vec<LinkSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSpec {
    pub name: String,
    pub permission: Permission,
    #[serde(default)]
    pub ldap: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSpec {
    pub name: String,
    /// Defaults to the username
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub owner_of: Vec<String>,
    /// Member of the system group
    #[serde(default)]
    pub admin: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectSpec {
    pub name: String,
    pub kind: String,
    pub owner: String,
    pub group: String,
    /// Defaults to the group's permission
    #[serde(default)]
    pub permission: Option<Permission>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkSpec {
    pub parent: String,
    pub child: String,
    pub kind: LinkKind,
    /// Defaults to the parent's owner
    #[serde(default)]
    pub owner: Option<String>,
}

/// A kernel populated from a scenario, with name lookups
pub struct LoadedScenario {
    pub kernel: Kernel,
    groups: HashMap<String, GroupId>,
    users: HashMap<String, UserId>,
    objects: HashMap<String, ObjectRef>,
    passwords: HashMap<String, String>,
}

impl LoadedScenario {
    pub fn group(&self, name: &str) -> Result<GroupId> {
        self.groups
            .get(name)
            .copied()
            .ok_or_else(|| anyhow!("Unknown group '{}'", name))
    }

    pub fn user(&self, name: &str) -> Result<UserId> {
        self.users
            .get(name)
            .copied()
            .ok_or_else(|| anyhow!("Unknown user '{}'", name))
    }

    pub fn object(&self, name: &str) -> Result<&ObjectRef> {
        self.objects
            .get(name)
            .ok_or_else(|| anyhow!("Unknown object '{}'", name))
    }

    pub fn password(&self, user: &str) -> Result<&str> {
        self.passwords
            .get(user)
            .map(String::as_str)
            .ok_or_else(|| anyhow!("Unknown user '{}'", user))
    }

    /// Translate a group argument into a `context-group` header value.
    ///
    /// Group names are resolved; ids and the wildcard forms pass through.
    pub fn context_header(&self, group: &str) -> String {
        match self.groups.get(group) {
            Some(id) => id.0.to_string(),
            None => group.to_string(),
        }
    }
}

impl Scenario {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario {:?}", path))?;
        Self::from_toml(&content).with_context(|| format!("Invalid scenario {:?}", path))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Build a kernel holding this scenario's state
    pub async fn load(&self, config: TenantryConfig) -> Result<LoadedScenario> {
        let reserved = config.reserved.clone();
        let mut credentials = StaticCredentials::new();
        let mut passwords = HashMap::new();
        for user in &self.users {
            let password = user.password.clone().unwrap_or_else(|| user.name.clone());
            credentials.add_user(&user.name, &password);
            passwords.insert(user.name.clone(), password);
        }

        let kernel = Kernel::builder(config)
            .with_credentials(Arc::new(credentials))
            .build()?;
        let root = kernel.root_context();
        let lifecycle = kernel.lifecycle();

        let mut groups = HashMap::from([
            (reserved.system_group_name.clone(), reserved.system_group()),
            (reserved.user_group_name.clone(), reserved.user_group()),
        ]);
        for spec in &self.groups {
            let group = NewGroup {
                name: spec.name.clone(),
                permission: spec.permission,
                ldap: spec.ldap,
            };
            let id = lifecycle.create_group(&root, group).await?;
            groups.insert(spec.name.clone(), id);
        }

        let lookup_group = |name: &str| {
            groups
                .get(name)
                .copied()
                .ok_or_else(|| anyhow!("Unknown group '{}'", name))
        };

        let mut users = HashMap::from([(reserved.root_user_name.clone(), reserved.root_user())]);
        for spec in &self.users {
            if users.contains_key(&spec.name) {
                bail!("User '{}' is declared twice", spec.name);
            }
            let home = match spec.groups.first() {
                Some(name) => lookup_group(name)?,
                None => reserved.user_group(),
            };
            let id = lifecycle
                .create_experimenter(&root, NewExperimenter::new(&spec.name), home)
                .await?;

            let mut extra = spec
                .groups
                .iter()
                .skip(1)
                .map(|name| lookup_group(name))
                .collect::<Result<Vec<_>>>()?;
            if spec.admin {
                extra.push(reserved.system_group());
            }
            if !extra.is_empty() {
                lifecycle.add_groups(&root, id, &extra).await?;
            }
            for name in &spec.owner_of {
                lifecycle.set_group_owner(&root, lookup_group(name)?, id).await?;
            }
            users.insert(spec.name.clone(), id);
        }

        let lookup_user = |name: &str| {
            users
                .get(name)
                .copied()
                .ok_or_else(|| anyhow!("Unknown user '{}'", name))
        };

        // Seed rows directly: a scenario describes persisted state, not a
        // sequence of requests
        let store = kernel.store();
        let registry = kernel.registry();
        let mut objects = HashMap::new();
        let mut mutations = Vec::new();
        for spec in &self.objects {
            let group = lookup_group(&spec.group)?;
            let permission = match spec.permission {
                Some(permission) => permission,
                None => registry.group(group).await?.permission,
            };
            let reference = ObjectRef::new(&spec.kind, store.reserve_id().await?);
            mutations.push(Mutation::InsertObject(StoredObject {
                reference: reference.clone(),
                name: spec.name.clone(),
                details: Details::new(lookup_user(&spec.owner)?, group, permission),
            }));
            if objects.insert(spec.name.clone(), reference).is_some() {
                bail!("Object '{}' is declared twice", spec.name);
            }
        }

        for spec in &self.links {
            let parent = self.object_spec(&spec.parent)?;
            let group = lookup_group(&parent.group)?;
            let owner = match &spec.owner {
                Some(name) => lookup_user(name)?,
                None => lookup_user(&parent.owner)?,
            };
            let permission = registry.group(group).await?.permission;
            mutations.push(Mutation::InsertLink(StoredLink {
                id: LinkId(store.reserve_id().await?),
                parent: objects[&spec.parent].clone(),
                child: objects
                    .get(&spec.child)
                    .cloned()
                    .ok_or_else(|| anyhow!("Unknown object '{}'", spec.child))?,
                kind: spec.kind,
                details: Details::new(owner, group, permission),
            }));
        }

        if !mutations.is_empty() {
            let version = store.version().await?;
            store.commit(version, mutations).await?;
        }

        debug!(
            groups = groups.len(),
            users = users.len(),
            objects = objects.len(),
            links = self.links.len(),
            "Scenario loaded"
        );

        Ok(LoadedScenario {
            kernel,
            groups,
            users,
            objects,
            passwords,
        })
    }

    fn object_spec(&self, name: &str) -> Result<&ObjectSpec> {
        self.objects
            .iter()
            .find(|o| o.name == name)
            .ok_or_else(|| anyhow!("Unknown object '{}'", name))
    }
}
