//! Verification tests for machine images.
//!
//! The tests live in `tests/it`. Tests that boot real machines are gated behind the `machine`
//! feature and read the image from `MACHINE_IMAGE_PATH`.
