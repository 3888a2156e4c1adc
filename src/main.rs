fn main() -> std::process::ExitCode {
    tasklist_lib::run()
}
