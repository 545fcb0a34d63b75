/// Sentinel device used when no compute devices were configured.
pub const DEFAULT_DEVICE: &str = "cpu";

/// Assigns `member_count` ensemble members to `devices` round-robin:
/// member `i` gets `devices[i % devices.len()]`. With an empty device list
/// every member is assigned the host fallback [`DEFAULT_DEVICE`].
///
/// The assignment is a pure function of its inputs; serialization of
/// same-device members is the dispatcher's job, not this one's.
pub fn assign(member_count: usize, devices: &[String]) -> Vec<String> {
    if devices.is_empty() {
        return vec![DEFAULT_DEVICE.to_string(); member_count];
    }
    (0..member_count)
        .map(|i| devices[i % devices.len()].clone())
        .collect()
}
