mod timer_task;
pub(crate) use timer_task::*;

#[cfg(test)]
mod timer_test;
