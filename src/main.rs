fn main() -> std::process::ExitCode {
    slotlink::run()
}
