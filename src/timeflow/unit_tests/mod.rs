#[cfg(test)]
mod lsu_tests;
#[cfg(test)]
mod mshr_tests;
#[cfg(test)]
mod sim_tests;
