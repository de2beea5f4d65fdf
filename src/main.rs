fn main() -> std::io::Result<()> {
    querybridge_lib::run()
}
