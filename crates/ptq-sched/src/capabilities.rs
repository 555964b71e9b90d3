use ptq_core::{PlatformId, RepetitionType, TestId, TriggerableId};

/// What a triggerable advertises it can run. The registry behind this lives
/// with the build-triggering collaborator; the scheduler only consults it
/// before creating a group.
pub trait TriggerableCapabilities {
    fn supports_repetition_type(
        &self,
        triggerable: TriggerableId,
        platform: PlatformId,
        test: TestId,
        ty: RepetitionType,
    ) -> bool;
}

/// Accepts every repetition type. Useful for tests and deployments whose
/// triggerables all speak the full contract.
pub struct AllowAllCapabilities;

impl TriggerableCapabilities for AllowAllCapabilities {
    fn supports_repetition_type(
        &self,
        _triggerable: TriggerableId,
        _platform: PlatformId,
        _test: TestId,
        _ty: RepetitionType,
    ) -> bool {
        true
    }
}
