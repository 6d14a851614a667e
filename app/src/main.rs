fn main() -> anyhow::Result<()> {
    broadcaster_lib::run()
}
