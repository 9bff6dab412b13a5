use cumulus_core::{Call, Operation, ResourceKind, Result};

use super::Cloud;
use crate::types::TagTarget;

fn tag_call(target: TagTarget, id: &str) -> Call {
    Call::new(
        ResourceKind::Tag,
        Operation::Tag,
        format!("{}/{id}", target.as_str()),
    )
}

impl Cloud {
    /// # Errors
    /// Surfaces the tagging failure after the read budget is spent.
    pub async fn append_tag(&self, target: TagTarget, id: &str, tag: &str) -> Result<()> {
        let call = tag_call(target, id);
        self.read(&call, || self.clients.network.add_tag(target, id, tag))
            .await
    }

    /// # Errors
    /// Surfaces the tagging failure after the read budget is spent.
    pub async fn delete_tag(&self, target: TagTarget, id: &str, tag: &str) -> Result<()> {
        let call = tag_call(target, id);
        self.read(&call, || self.clients.network.delete_tag(target, id, tag))
            .await
    }

    /// Replace every tag on a resource, returning the tags now set.
    ///
    /// # Errors
    /// Surfaces the tagging failure after the read budget is spent.
    pub async fn replace_all_tags(
        &self,
        target: TagTarget,
        id: &str,
        tags: &[String],
    ) -> Result<Vec<String>> {
        let call = tag_call(target, id);
        self.read(&call, || {
            self.clients.network.replace_all_tags(target, id, tags)
        })
        .await
    }
}
