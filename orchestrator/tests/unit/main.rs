mod test_controller;
mod test_fsm;
mod test_gate;
mod test_rollback;
mod test_runner;
mod test_stage;
