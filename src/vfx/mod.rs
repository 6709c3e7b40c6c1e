pub mod binding;
pub mod easing;
pub mod gradient_cache;
pub mod property_set;
pub mod timeline;
pub mod value;
