//! Update plan entries and their fixed execution priority.

/// Component id of the tag itself. Module images are also written here.
pub const TAG_COMPONENT_ID: u32 = 0;

/// What an image is for. Determines ordering and how execution is confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateTarget {
    /// The tag; confirmed by reboot and reconnection.
    Tag,
    /// Attached gear; confirmed by an execute notification.
    Gear,
    /// Interposer component; confirmed like gear.
    Interposer,
    /// Loadable module on the tag; never executed.
    Module { module_id: u32 },
}

impl UpdateTarget {
    fn priority(self) -> u8 {
        match self {
            Self::Gear | Self::Interposer => 0,
            Self::Tag => 1,
            Self::Module { .. } => 2,
        }
    }

    pub fn is_module(self) -> bool {
        matches!(self, Self::Module { .. })
    }

    /// Components that reset on their own and report back by notification.
    pub fn confirms_by_notification(self) -> bool {
        matches!(self, Self::Gear | Self::Interposer)
    }
}

/// One image to deliver, as handed over by the catalog/cache collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateInfo {
    pub target: UpdateTarget,
    pub vendor_id: u32,
    pub product_id: u32,
    pub component_id: u32,
    /// `None` until the collaborator has fetched the image.
    pub image: Option<Vec<u8>>,
}

impl UpdateInfo {
    pub fn tag(vendor_id: u32, product_id: u32, image: Vec<u8>) -> Self {
        Self {
            target: UpdateTarget::Tag,
            vendor_id,
            product_id,
            component_id: TAG_COMPONENT_ID,
            image: Some(image),
        }
    }

    pub fn gear(vendor_id: u32, product_id: u32, component_id: u32, image: Vec<u8>) -> Self {
        Self {
            target: UpdateTarget::Gear,
            vendor_id,
            product_id,
            component_id,
            image: Some(image),
        }
    }

    pub fn interposer(vendor_id: u32, product_id: u32, component_id: u32, image: Vec<u8>) -> Self {
        Self {
            target: UpdateTarget::Interposer,
            vendor_id,
            product_id,
            component_id,
            image: Some(image),
        }
    }

    pub fn module(vendor_id: u32, product_id: u32, module_id: u32, image: Vec<u8>) -> Self {
        Self {
            target: UpdateTarget::Module { module_id },
            vendor_id,
            product_id,
            component_id: TAG_COMPONENT_ID,
            image: Some(image),
        }
    }

    pub fn module_id(&self) -> Option<u32> {
        match self.target {
            UpdateTarget::Module { module_id } => Some(module_id),
            _ => None,
        }
    }

    pub fn image_len(&self) -> usize {
        self.image.as_ref().map_or(0, Vec::len)
    }
}

/// Non-tag components first, then the tag, then modules. Stable within a
/// category.
pub fn order(mut plan: Vec<UpdateInfo>) -> Vec<UpdateInfo> {
    plan.sort_by_key(|info| info.target.priority());
    plan
}
