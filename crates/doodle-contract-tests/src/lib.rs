#![forbid(unsafe_code)]


#[cfg(test)]
mod determinism;

#[cfg(test)]
mod scenarios;
