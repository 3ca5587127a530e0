//! Custom resources of the `management.cattle.io` API group.

pub mod binding;
pub mod global_role;
pub mod role_template;
pub mod scope;
pub mod user;

pub use self::{
    binding::{
        BindingSubject, ClusterRoleTemplateBinding, ClusterRoleTemplateBindingSpec,
        ProjectRoleTemplateBinding, ProjectRoleTemplateBindingSpec, RoleTemplateBinding,
    },
    global_role::{GlobalRole, GlobalRoleBinding, GlobalRoleBindingSpec, GlobalRoleSpec},
    role_template::{Context, RoleTemplate, RoleTemplateSpec},
    scope::{Cluster, ClusterSpec, Project, ProjectSpec},
    user::{Token, TokenSpec, User, UserSpec},
};

pub const GROUP: &str = "management.cattle.io";
