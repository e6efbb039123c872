#[cfg(test)]
mod bootstrap_tests;
#[cfg(test)]
mod fabric_tests;
