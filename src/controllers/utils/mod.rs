mod ingress_class_filter;

pub use ingress_class_filter::{is_classless, is_default_ingress_class, matches_ingress_class, ClassBinding};
