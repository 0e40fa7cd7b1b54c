mod image;
mod machine;
mod payload;

pub use image::{ArchiveKind, ChecksumKind, Distribution, ImageChecksum, ImageSpec, ImageVariant, Protocol};
pub use machine::{AZURE_CHASSIS_ASSET_TAG, Generation, HardwareIdentity, MachineSpec, NetworkAttachment};
pub use payload::ProvisioningPayload;
