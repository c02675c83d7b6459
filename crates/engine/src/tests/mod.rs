mod helpers;

mod cluster_tests;
mod get_tests;
