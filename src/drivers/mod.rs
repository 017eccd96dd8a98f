pub mod trackpad;
