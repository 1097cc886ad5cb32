//! The tree of components, like a container and the sources it was built from.

use crate::Error;
use openlcs_common::db::Database;
use openlcs_entity::{component, component_node};
use sea_orm::{
    prelude::*,
    sea_query::{Expr, OnConflict},
    ActiveValue::Set,
    QueryFilter, QueryOrder, QuerySelect,
};
use tracing::instrument;

#[derive(Clone, Debug)]
pub struct ComponentTree {
    db: Database,
}

impl ComponentTree {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Get or create the node of a component, below `parent`.
    ///
    /// Concurrent callers end up with the same node: the insert is dropped on conflict, and
    /// the winner is read back.
    async fn node(
        &self,
        component_id: Uuid,
        parent_id: Option<Uuid>,
    ) -> Result<component_node::Model, Error> {
        let target = match parent_id {
            Some(_) => OnConflict::columns([
                component_node::Column::ComponentId,
                component_node::Column::ParentId,
            ])
            .do_nothing()
            .to_owned(),
            None => OnConflict::column(component_node::Column::ComponentId)
                .target_and_where(Expr::col(component_node::Column::ParentId).is_null())
                .do_nothing()
                .to_owned(),
        };

        component_node::Entity::insert(component_node::ActiveModel {
            id: Set(Uuid::new_v4()),
            component_id: Set(component_id),
            parent_id: Set(parent_id),
        })
        .on_conflict(target)
        .do_nothing()
        .exec(&self.db)
        .await?;

        let parent = match parent_id {
            Some(parent_id) => component_node::Column::ParentId.eq(parent_id),
            None => component_node::Column::ParentId.is_null(),
        };

        component_node::Entity::find()
            .filter(component_node::Column::ComponentId.eq(component_id))
            .filter(parent)
            .one(&self.db)
            .await?
            .ok_or_else(|| {
                Error::IntegrityConflict(format!("node of component {component_id} vanished"))
            })
    }

    /// Attach `children` as direct descendants of `parent`, which becomes the root of a tree.
    ///
    /// Returns the node of the parent. Building the same tree again changes nothing.
    #[instrument(skip(self, children), fields(children = children.len()), err)]
    pub async fn build_tree(
        &self,
        parent: Uuid,
        children: &[Uuid],
    ) -> Result<component_node::Model, Error> {
        let root = self.node(parent, None).await?;

        for child in children {
            self.node(*child, Some(root.id)).await?;
        }

        log::info!(
            "Component {parent} has {} direct descendants",
            children.len()
        );

        Ok(root)
    }

    /// The components directly below the root node of `parent`.
    pub async fn children(&self, parent: Uuid) -> Result<Vec<component::Model>, Error> {
        let Some(root) = component_node::Entity::find()
            .filter(component_node::Column::ComponentId.eq(parent))
            .filter(component_node::Column::ParentId.is_null())
            .one(&self.db)
            .await?
        else {
            return Ok(vec![]);
        };

        Ok(component::Entity::find()
            .inner_join(component_node::Entity)
            .filter(component_node::Column::ParentId.eq(root.id))
            .order_by_asc(component::Column::Purl)
            .distinct()
            .all(&self.db)
            .await?)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::service::component::{ComponentInfo, ComponentService};
    use futures::future::try_join_all;
    use openlcs_common::db::DatabaseErrors;
    use openlcs_test_context::LcsContext;
    use sea_orm::PaginatorTrait;
    use test_context::test_context;
    use test_log::test;

    fn info(kind: &str, name: &str) -> ComponentInfo {
        ComponentInfo {
            kind: kind.into(),
            name: name.into(),
            version: "1.0".into(),
            release: "1".into(),
            ..Default::default()
        }
    }

    #[test_context(LcsContext)]
    #[test(tokio::test)]
    async fn build_is_idempotent(ctx: &LcsContext) -> Result<(), anyhow::Error> {
        let components = ComponentService::new(ctx.db.clone());
        let tree = ComponentTree::new(ctx.db.clone());

        let container = components.get_or_create(&info("oci", "ubi"), None).await?;
        let bash = components.get_or_create(&info("rpm", "bash"), None).await?;
        let glibc = components.get_or_create(&info("rpm", "glibc"), None).await?;

        let first = tree.build_tree(container.id, &[bash.id, glibc.id]).await?;
        let second = tree.build_tree(container.id, &[bash.id, glibc.id]).await?;
        assert_eq!(first, second);
        assert_eq!(first.parent_id, None);

        assert_eq!(component_node::Entity::find().count(&ctx.db).await?, 3);

        let children = tree.children(container.id).await?;
        assert_eq!(
            children.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            vec!["bash", "glibc"]
        );

        Ok(())
    }

    async fn roots(ctx: &LcsContext, component_id: Uuid) -> Result<u64, anyhow::Error> {
        Ok(component_node::Entity::find()
            .filter(component_node::Column::ComponentId.eq(component_id))
            .filter(component_node::Column::ParentId.is_null())
            .count(&ctx.db)
            .await?)
    }

    #[test_context(LcsContext)]
    #[test(tokio::test)]
    async fn single_root_per_component(ctx: &LcsContext) -> Result<(), anyhow::Error> {
        let container = ComponentService::new(ctx.db.clone())
            .get_or_create(&info("oci", "ubi"), None)
            .await?;

        let root = || component_node::ActiveModel {
            id: Set(Uuid::new_v4()),
            component_id: Set(container.id),
            parent_id: Set(None),
        };

        root().insert(&ctx.db).await?;
        let err = root()
            .insert(&ctx.db)
            .await
            .expect_err("a second root must be rejected");
        assert!(err.is_duplicate(), "{err}");

        assert_eq!(roots(ctx, container.id).await?, 1);

        Ok(())
    }

    #[test_context(LcsContext)]
    #[test(tokio::test)]
    async fn concurrent_builds_share_root(ctx: &LcsContext) -> Result<(), anyhow::Error> {
        let components = ComponentService::new(ctx.db.clone());
        let container = components.get_or_create(&info("oci", "ubi"), None).await?;

        let mut children = vec![];
        for name in ["bash", "glibc", "fio", "zlib"] {
            children.push(components.get_or_create(&info("rpm", name), None).await?);
        }

        // like the imports forked from a source container, attaching themselves at once
        let nodes = try_join_all(children.iter().map(|child| {
            let tree = ComponentTree::new(ctx.db.clone());
            let parent = container.id;
            let child = child.id;
            async move { tree.build_tree(parent, &[child]).await }
        }))
        .await?;

        assert!(nodes.iter().all(|node| node.id == nodes[0].id));
        assert_eq!(roots(ctx, container.id).await?, 1);

        let found = ComponentTree::new(ctx.db.clone())
            .children(container.id)
            .await?;
        let mut names = found.iter().map(|c| c.name.as_str()).collect::<Vec<_>>();
        names.sort();
        assert_eq!(names, vec!["bash", "fio", "glibc", "zlib"]);

        Ok(())
    }
}
