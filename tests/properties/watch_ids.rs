//! Property tests for raw watch id handling.

use proptest::prelude::*;

use dirmon::WatchId;

proptest! {
    /// PROPERTY: Only raw values with a non-zero slot part are accepted, and
    /// an accepted id reports the raw value it was built from.
    #[test]
    fn property_from_raw(raw in any::<u64>()) {
        match WatchId::from_raw(raw) {
            Some(id) => {
                prop_assert!(raw & 0xffff_ffff != 0);
                prop_assert_eq!(id.raw(), raw);
            }
            None => prop_assert_eq!(raw & 0xffff_ffff, 0),
        }
    }
}
