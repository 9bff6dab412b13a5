use cumulus_core::{at_most_one, Call, OptionExt, ResourceKind, Result};

use super::Cloud;
use crate::api::all_pages;
use crate::types::Image;

impl Cloud {
    /// Look up an image by name.
    ///
    /// # Errors
    /// `NotFound` when no image has this name, `Ambiguous` when several do.
    pub async fn get_image(&self, name: &str) -> Result<Image> {
        let call = Call::list(ResourceKind::Image, name);
        let images = self
            .read(&call, || {
                all_pages(|page| self.clients.image.list_images(Some(name), page))
            })
            .await?;
        at_most_one(ResourceKind::Image, name, images)?.ok_or_not_found(ResourceKind::Image, name)
    }
}
